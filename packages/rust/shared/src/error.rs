//! Error types for LeadScout.
//!
//! Library crates use [`LeadScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all LeadScout operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LeadScoutError {
    /// The automation engine could not start. Fatal for the run.
    #[error("session init error: {0}")]
    SessionInit(String),

    /// One source adapter exhausted its retries.
    #[error("source unavailable ({source_id}): {message}")]
    SourceUnavailable { source_id: String, message: String },

    /// Detail extraction failed for a single listing.
    #[error("extraction error at {url}: {message}")]
    Extraction { url: String, message: String },

    /// The account has used its monthly session allowance.
    #[error("monthly session quota exceeded: {used}/{limit} sessions used")]
    SessionQuotaExceeded { used: u32, limit: u32 },

    /// The account has used its daily allowance for this agent type.
    #[error("daily quota exceeded for {agent_type}: {used}/{limit} runs today")]
    DailyQuotaExceeded {
        agent_type: String,
        used: u32,
        limit: u32,
    },

    /// A conflicting agent type is already running for the account.
    #[error("agent conflict: {requested} cannot start while {running} is running")]
    AgentConflict { requested: String, running: String },

    /// Too many premium sessions are already running for the account.
    #[error("concurrency cap reached: {running}/{cap} sessions running")]
    ConcurrencyCapReached { running: u32, cap: u32 },

    /// The final write of the result set failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The wall-clock ceiling was hit.
    #[error("run timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The caller cancelled the run.
    #[error("run cancelled")]
    Cancelled,

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a listing source.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or payload coercion error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    /// Request validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A background run task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LeadScoutError>;

impl LeadScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Create an extraction error for a single listing.
    pub fn extraction(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Extraction {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a source-unavailable error for an adapter.
    pub fn source_unavailable(source_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            message: msg.into(),
        }
    }

    /// Stable machine-readable code for structured error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionInit(_) => "session_init_error",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::Extraction { .. } => "extraction_error",
            Self::SessionQuotaExceeded { .. } => "session_quota_exceeded",
            Self::DailyQuotaExceeded { .. } => "daily_quota_exceeded",
            Self::AgentConflict { .. } => "agent_conflict",
            Self::ConcurrencyCapReached { .. } => "concurrency_cap_reached",
            Self::Persistence(_) => "persistence_error",
            Self::Timeout { .. } => "timeout_error",
            Self::Cancelled => "cancelled",
            Self::Config { .. } => "config_error",
            Self::Network(_) => "network_error",
            Self::Parse { .. } => "parse_error",
            Self::Io { .. } => "io_error",
            Self::Validation { .. } => "validation_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether this is a governor rejection (reported before any work starts).
    pub fn is_governor_rejection(&self) -> bool {
        matches!(
            self,
            Self::SessionQuotaExceeded { .. }
                | Self::DailyQuotaExceeded { .. }
                | Self::AgentConflict { .. }
                | Self::ConcurrencyCapReached { .. }
        )
    }
}
