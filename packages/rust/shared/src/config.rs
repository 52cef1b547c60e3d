//! Application configuration for LeadScout.
//!
//! User config lives at `~/.leadscout/leadscout.toml`.
//! CLI flags override config file values, which override defaults.
//! Tuning values (weights, phrase lists, floors) are defaults here rather
//! than constants in the scoring code so they can be overridden per test.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LeadScoutError, Result};
use crate::types::{AgentType, SubscriptionTier};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadscout";

// ---------------------------------------------------------------------------
// Config structs (matching leadscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub automation: AutomationConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub governor: GovernorConfig,

    #[serde(default)]
    pub sources: SourcesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the libSQL database holding sessions and leads.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Result-set size when the request does not specify one.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Hard wall-clock ceiling for one run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_results: default_max_results(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_database_path() -> String {
    "~/.leadscout/leadscout.db".into()
}
fn default_max_results() -> usize {
    crate::types::DEFAULT_MAX_RESULTS
}
fn default_timeout_secs() -> u64 {
    600
}

/// `[automation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Attempts per operation inside the retry wrapper.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * base`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Browserless endpoint for rendered page loads. Direct HTTP when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browserless_url: Option<String>,

    /// Name of the env var holding the Browserless token (never store the token itself).
    #[serde(default = "default_browserless_token_env")]
    pub browserless_token_env: String,

    /// Allow loopback/private targets. Only for local test servers.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            browserless_url: None,
            browserless_token_env: default_browserless_token_env(),
            allow_private_hosts: false,
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("LeadScout/", env!("CARGO_PKG_VERSION")).into()
}
fn default_browserless_token_env() -> String {
    "BROWSERLESS_TOKEN".into()
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Weights of the composite relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingWeights {
    pub quality: f64,
    pub recency: f64,
    pub value: f64,
    pub urgency: f64,
    /// Scales dollars into the range of the other terms.
    pub value_divisor: f64,
    /// Points per matched urgency phrase before weighting.
    pub urgency_unit: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            quality: 0.4,
            recency: 0.3,
            value: 0.2,
            urgency: 0.1,
            value_divisor: 10.0,
            urgency_unit: 10.0,
        }
    }
}

/// Baseline project value for a category, chosen by keyword match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBaseline {
    pub category: String,
    pub keywords: Vec<String>,
    pub value: f64,
}

/// A geography cluster with its own value-floor multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoClusterConfig {
    pub name: String,
    /// Lowercase substrings identifying geographies in this cluster.
    pub markers: Vec<String>,
    pub floor_multiplier: f64,
}

/// `[scoring]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: RankingWeights,
    /// Stated or parsed dollar figures at or below this are not trusted.
    pub sanity_floor: f64,
    pub default_baseline: f64,
    pub baselines: Vec<CategoryBaseline>,
    pub large_scope_terms: Vec<String>,
    pub small_scope_terms: Vec<String>,
    pub large_scope_multiplier: f64,
    pub small_scope_multiplier: f64,
    pub urgency_multiplier: f64,
    pub urgency_phrases: Vec<String>,
    pub spam_phrases: Vec<String>,
    /// Regexes for "same-day cash bonus" style bait.
    pub spam_patterns: Vec<String>,
    pub default_floor: f64,
    pub category_floors: BTreeMap<String, f64>,
    pub geography_clusters: Vec<GeoClusterConfig>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let baseline = |category: &str, keywords: &[&str], value: f64| CategoryBaseline {
            category: category.into(),
            keywords: strings(keywords),
            value,
        };

        Self {
            weights: RankingWeights::default(),
            sanity_floor: 50.0,
            default_baseline: 5_000.0,
            baselines: vec![
                baseline("roofing", &["roof", "shingle", "gutter"], 12_000.0),
                baseline("kitchen", &["kitchen", "cabinet", "countertop"], 15_000.0),
                baseline("bathroom", &["bathroom", "shower", "vanity"], 9_000.0),
                baseline("drywall", &["drywall", "sheetrock", "plaster"], 4_000.0),
                baseline("hvac", &["hvac", "furnace", "air condition"], 6_000.0),
                baseline("flooring", &["flooring", "hardwood", "tile floor"], 5_000.0),
                baseline("painting", &["paint", "stain"], 3_000.0),
                baseline("electrical", &["electric", "wiring", "outlet"], 2_000.0),
                baseline("plumbing", &["plumb", "leak", "water heater"], 1_500.0),
                baseline("window_screen", &["window screen", "screen repair"], 250.0),
            ],
            large_scope_terms: strings(&["large", "commercial", "whole house", "entire", "multi-unit"]),
            small_scope_terms: strings(&["small", "minor", "quick fix", "patch"]),
            large_scope_multiplier: 1.5,
            small_scope_multiplier: 0.6,
            urgency_multiplier: 1.2,
            urgency_phrases: strings(&[
                "asap",
                "urgent",
                "emergency",
                "immediately",
                "right away",
                "today",
                "this week",
            ]),
            spam_phrases: strings(&[
                "work from home",
                "make money fast",
                "no experience needed",
                "guaranteed income",
                "be your own boss",
                "wire transfer",
                "cash app only",
                "crypto payment",
                "mlm",
            ]),
            spam_patterns: strings(&[
                r"(?i)same[\s-]*day\s+(cash\s+)?bonus",
                r"(?i)\$\s*\d+\s+(cash\s+)?bonus\s+(paid\s+)?(today|same[\s-]*day)",
            ]),
            default_floor: 100.0,
            category_floors: [
                ("roofing", 1_500.0),
                ("kitchen", 2_000.0),
                ("bathroom", 1_500.0),
                ("concrete", 800.0),
                ("flooring", 500.0),
                ("hvac", 400.0),
                ("drywall", 300.0),
                ("painting", 300.0),
                ("electrical", 200.0),
                ("plumbing", 200.0),
                ("landscaping", 150.0),
                ("window_screen", 150.0),
                ("handyman", 100.0),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
            geography_clusters: vec![
                GeoClusterConfig {
                    name: "high_cost_metro".into(),
                    markers: strings(&[
                        "san francisco",
                        "new york",
                        "los angeles",
                        "seattle",
                        "boston",
                        "san jose",
                        "washington, dc",
                    ]),
                    floor_multiplier: 1.5,
                },
                GeoClusterConfig {
                    name: "growth_metro".into(),
                    markers: strings(&["austin", "denver", "portland", "nashville", "atlanta", "miami"]),
                    floor_multiplier: 1.2,
                },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

/// Monthly session allowance per subscription tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    pub starter: u32,
    pub professional: u32,
    pub scale: u32,
    pub enterprise: u32,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            starter: 2,
            professional: 5,
            scale: 10,
            enterprise: 40,
        }
    }
}

impl TierLimits {
    pub fn for_tier(&self, tier: SubscriptionTier) -> u32 {
        match tier {
            SubscriptionTier::Starter => self.starter,
            SubscriptionTier::Professional => self.professional,
            SubscriptionTier::Scale => self.scale,
            SubscriptionTier::Enterprise => self.enterprise,
        }
    }
}

/// `[governor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Premium sessions allowed to run at once per account.
    pub concurrency_cap: u32,
    pub tier_limits: TierLimits,
    /// Runs per local day, keyed by agent type (`lead_discovery`, ...).
    pub daily_limits: BTreeMap<String, u32>,
    /// Agent types that may not run at the same time for one account.
    pub conflicts: Vec<(AgentType, AgentType)>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: 2,
            tier_limits: TierLimits::default(),
            daily_limits: [
                (AgentType::LeadDiscovery, 3),
                (AgentType::CostAnalysis, 5),
                (AgentType::MarketResearch, 5),
                (AgentType::BidWriter, 10),
            ]
            .into_iter()
            .map(|(agent, limit)| (agent.as_str().to_string(), limit))
            .collect(),
            conflicts: vec![(AgentType::LeadDiscovery, AgentType::CostAnalysis)],
        }
    }
}

impl GovernorConfig {
    /// Daily limit for an agent type; `None` means unlimited.
    pub fn daily_limit(&self, agent: AgentType) -> Option<u32> {
        self.daily_limits.get(agent.as_str()).copied()
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// `[sources.classifieds]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedsSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `{site}` is replaced with the geography's site slug.
    #[serde(default = "default_classifieds_base")]
    pub base_url: String,
}

impl Default for ClassifiedsSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_classifieds_base(),
        }
    }
}

/// `[sources.government]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernmentSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_government_base")]
    pub base_url: String,
}

impl Default for GovernmentSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_government_base(),
        }
    }
}

/// `[sources]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub classifieds: ClassifiedsSourceConfig,
    #[serde(default)]
    pub government: GovernmentSourceConfig,
}

fn default_true() -> bool {
    true
}
fn default_classifieds_base() -> String {
    "https://{site}.craigslist.org".into()
}
fn default_government_base() -> String {
    "https://sam.gov".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leadscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LeadScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadscout/leadscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeadScoutError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LeadScoutError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LeadScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LeadScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LeadScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| LeadScoutError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("BROWSERLESS_TOKEN"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.automation.retry_attempts, 3);
        assert_eq!(parsed.governor.concurrency_cap, 2);
        assert_eq!(parsed.scoring.weights.value_divisor, 10.0);
        assert_eq!(parsed.governor.daily_limit(AgentType::LeadDiscovery), Some(3));
        assert_eq!(
            parsed.governor.conflicts,
            vec![(AgentType::LeadDiscovery, AgentType::CostAnalysis)]
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let toml_str = r#"
[defaults]
max_results = 25

[scoring]
spam_phrases = ["free money"]

[governor]
concurrency_cap = 1
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.max_results, 25);
        assert_eq!(config.defaults.timeout_secs, 600);
        assert_eq!(config.scoring.spam_phrases, vec!["free money".to_string()]);
        assert_eq!(config.scoring.sanity_floor, 50.0);
        assert_eq!(config.governor.concurrency_cap, 1);
        assert_eq!(config.governor.tier_limits.scale, 10);
    }

    #[test]
    fn tier_limits_lookup() {
        let limits = TierLimits::default();
        assert_eq!(limits.for_tier(SubscriptionTier::Scale), 10);
        assert!(limits.for_tier(SubscriptionTier::Starter) < limits.for_tier(SubscriptionTier::Scale));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        let p = expand_home("/tmp/leads.db").expect("expand");
        assert_eq!(p, PathBuf::from("/tmp/leads.db"));
    }
}
