//! Shared types, error model, and configuration for LeadScout.
//!
//! This crate is the foundation depended on by all other LeadScout crates.
//! It provides:
//! - [`LeadScoutError`]: the unified error type
//! - Domain types ([`CapabilityProfile`], [`CandidateListing`], [`QualifiedLead`], ...)
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AutomationConfig, CategoryBaseline, ClassifiedsSourceConfig, DefaultsConfig,
    GeoClusterConfig, GovernmentSourceConfig, GovernorConfig, RankingWeights, ScoringConfig,
    SourcesConfig, TierLimits, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from,
};
pub use error::{LeadScoutError, Result};
pub use types::{
    AgentType, CandidateListing, CapabilityProfile, DEFAULT_MAX_RESULTS, ExecutionSession,
    QualifiedLead, RunStatus, SearchMetadata, SearchRequest, SearchSession, ServiceOffering,
    SessionId, SubscriptionTier,
};
