//! Core domain types for the lead discovery pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LeadScoutError;

/// Result-set size used when the caller does not supply one.
pub const DEFAULT_MAX_RESULTS: usize = 10;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for search session identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Tiers and agent types
// ---------------------------------------------------------------------------

/// Subscription tier; determines the monthly session allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Starter,
    Professional,
    Scale,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Scale => "scale",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starter" => Ok(Self::Starter),
            "professional" | "pro" => Ok(Self::Professional),
            "scale" => Ok(Self::Scale),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(LeadScoutError::validation(format!(
                "unknown subscription tier '{other}'"
            ))),
        }
    }
}

/// Kind of automated agent competing for an account's premium sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    LeadDiscovery,
    CostAnalysis,
    MarketResearch,
    BidWriter,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadDiscovery => "lead_discovery",
            Self::CostAnalysis => "cost_analysis",
            Self::MarketResearch => "market_research",
            Self::BidWriter => "bid_writer",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "lead_discovery" => Ok(Self::LeadDiscovery),
            "cost_analysis" => Ok(Self::CostAnalysis),
            "market_research" => Ok(Self::MarketResearch),
            "bid_writer" => Ok(Self::BidWriter),
            other => Err(LeadScoutError::validation(format!(
                "unknown agent type '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Lifecycle of one pipeline run. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Queued, s) | (Self::Running, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(LeadScoutError::parse(format!("unknown run status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// CapabilityProfile
// ---------------------------------------------------------------------------

/// One service category a contractor offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    /// Category key, e.g. `roofing`, `drywall`.
    pub category: String,
    /// Primary categories get tighter, higher-yield queries.
    #[serde(default)]
    pub primary: bool,
}

/// Immutable snapshot of what a contractor does and where. Supplied per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub contractor_id: String,
    pub contractor_name: String,
    pub services: Vec<ServiceOffering>,
    /// Service-area geography, e.g. `Austin, TX`.
    pub service_area: String,
    pub tier: SubscriptionTier,
    /// Contractor's own minimum project value.
    #[serde(default)]
    pub min_project_value: f64,
}

impl CapabilityProfile {
    /// All category keys, primary ones first, in declaration order.
    pub fn categories(&self) -> Vec<&str> {
        let mut primary: Vec<&str> = Vec::new();
        let mut secondary: Vec<&str> = Vec::new();
        for s in &self.services {
            if s.primary {
                primary.push(&s.category);
            } else {
                secondary.push(&s.category);
            }
        }
        primary.extend(secondary);
        primary
    }

    pub fn is_primary(&self, category: &str) -> bool {
        self.services
            .iter()
            .any(|s| s.primary && s.category.eq_ignore_ascii_case(category))
    }
}

// ---------------------------------------------------------------------------
// CandidateListing
// ---------------------------------------------------------------------------

/// Raw extraction from one listing source. Discarded after scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateListing {
    /// Adapter that produced the listing.
    pub source_id: String,
    /// URL of the individual posting (never a search page).
    pub url: String,
    pub title: String,
    pub description: String,
    /// Compensation text as shown by the source.
    #[serde(default)]
    pub compensation_text: String,
    /// Structured price field from the source, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stated_value: Option<f64>,
    /// Posted-time text as shown by the source.
    #[serde(default)]
    pub posted_text: String,
    /// Absolute posting time, parsed by the adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Category of the query that surfaced this listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<String>,
    /// Search terms of the query that surfaced this listing.
    #[serde(default)]
    pub matched_terms: Vec<String>,
}

impl CandidateListing {
    /// Title and description joined for keyword matching.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

// ---------------------------------------------------------------------------
// QualifiedLead
// ---------------------------------------------------------------------------

/// A candidate that passed filtering and received a composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifiedLead {
    pub id: String,
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub compensation_text: String,
    pub posted_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Decay-bucketed recency (1..=10).
    pub recency_score: u8,
    /// Dollar estimate.
    pub estimated_value: f64,
    /// Whether the value came from a stated price rather than a baseline.
    pub value_confident: bool,
    /// Listing completeness score (0..=100).
    pub quality_score: f64,
    /// Urgency phrases matched in the text.
    pub urgency_indicators: Vec<String>,
    /// Composite relevance (0..=100).
    pub relevance_score: f64,
    pub matched_terms: Vec<String>,
    pub category: String,
}

// ---------------------------------------------------------------------------
// Request, session and progress records
// ---------------------------------------------------------------------------

/// Trigger payload from the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub geography: String,
    pub categories: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_tracking_id: Option<String>,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

/// One governed unit of work. Finalized exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSession {
    pub id: SessionId,
    pub account_id: String,
    pub agent_type: AgentType,
    pub categories: Vec<String>,
    pub geography: String,
    /// Sessions charged against the monthly quota.
    pub quota_charge: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

/// Progress-tracking record keyed by the caller's tracking id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSession {
    pub id: String,
    pub agent_type: AgentType,
    pub status: RunStatus,
    pub percent: u8,
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Provenance stored alongside every persisted lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub search_terms: Vec<String>,
    pub categories: Vec<String>,
    pub geography: String,
    pub searched_at: DateTime<Utc>,
    pub relevance_score: f64,
}
