//! Spam rejection and geography/category value floors.
//!
//! Checks run in a fixed order: spam first, then the value floor. Each
//! rejection is logged with its own `reason` so diagnostics can tell them apart.

use std::collections::BTreeMap;

use leadscout_shared::{LeadScoutError, QualifiedLead, Result, ScoringConfig};
use regex::Regex;
use tracing::debug;

/// Outcome of running one lead through the filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Pass,
    /// Matched a spam phrase or pattern.
    Spam { indicator: String },
    /// Estimated value under the applicable floor.
    BelowFloor { value: f64, floor: f64 },
}

impl FilterVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Spam { .. } => "spam",
            Self::BelowFloor { .. } => "below_floor",
        }
    }
}

// ---------------------------------------------------------------------------
// Value floors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct GeoCluster {
    name: String,
    markers: Vec<String>,
    floor_multiplier: f64,
}

/// Minimum acceptable value by category, scaled by geography cluster.
#[derive(Debug, Clone)]
pub struct ValueFloors {
    default_floor: f64,
    category_floors: BTreeMap<String, f64>,
    clusters: Vec<GeoCluster>,
}

impl ValueFloors {
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            default_floor: config.default_floor,
            category_floors: config
                .category_floors
                .iter()
                .map(|(k, v)| (k.to_lowercase(), *v))
                .collect(),
            clusters: config
                .geography_clusters
                .iter()
                .map(|c| GeoCluster {
                    name: c.name.clone(),
                    markers: c.markers.iter().map(|m| m.to_lowercase()).collect(),
                    floor_multiplier: c.floor_multiplier,
                })
                .collect(),
        }
    }

    fn cluster(&self, geography: &str) -> Option<&GeoCluster> {
        let geo = geography.to_lowercase();
        self.clusters
            .iter()
            .find(|c| c.markers.iter().any(|m| geo.contains(m.as_str())))
    }

    /// Name of the cluster a geography belongs to, if any.
    pub fn cluster_for(&self, geography: &str) -> Option<&str> {
        self.cluster(geography).map(|c| c.name.as_str())
    }

    /// Floor for `category` in `geography`.
    pub fn threshold(&self, category: &str, geography: &str) -> f64 {
        let base = self
            .category_floors
            .get(&category.to_lowercase())
            .copied()
            .unwrap_or(self.default_floor);

        let multiplier = self
            .cluster(geography)
            .map_or(1.0, |c| c.floor_multiplier);

        base * multiplier
    }
}

// ---------------------------------------------------------------------------
// QualityFilter
// ---------------------------------------------------------------------------

/// Rejects spam and leads worth less than their floor.
#[derive(Debug, Clone)]
pub struct QualityFilter {
    spam_phrases: Vec<String>,
    spam_patterns: Vec<Regex>,
    floors: ValueFloors,
    /// Contractor's own minimum, applied on top of the category floor.
    minimum_value: f64,
}

impl QualityFilter {
    /// Build from config. Fails if a spam pattern is not a valid regex.
    pub fn from_config(config: &ScoringConfig) -> Result<Self> {
        let spam_patterns = config
            .spam_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    LeadScoutError::config(format!("invalid spam pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            spam_phrases: config.spam_phrases.iter().map(|p| p.to_lowercase()).collect(),
            spam_patterns,
            floors: ValueFloors::from_config(config),
            minimum_value: 0.0,
        })
    }

    /// Copy of this filter that also enforces a contractor minimum.
    pub fn with_minimum_value(mut self, minimum: f64) -> Self {
        self.minimum_value = minimum.max(0.0);
        self
    }

    pub fn floors(&self) -> &ValueFloors {
        &self.floors
    }

    /// First spam phrase or pattern found in `text`.
    pub fn spam_indicator(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        if let Some(phrase) = self
            .spam_phrases
            .iter()
            .find(|p| lower.contains(p.as_str()))
        {
            return Some(phrase.clone());
        }
        self.spam_patterns
            .iter()
            .find_map(|re| re.find(text).map(|m| m.as_str().to_string()))
    }

    /// Floor applied to a lead in `category` and `geography`.
    pub fn threshold(&self, category: &str, geography: &str) -> f64 {
        self.floors
            .threshold(category, geography)
            .max(self.minimum_value)
    }

    /// Run the spam check, then the value-floor check.
    pub fn evaluate(&self, lead: &QualifiedLead, geography: &str) -> FilterVerdict {
        let text = format!("{} {}", lead.title, lead.description);
        if let Some(indicator) = self.spam_indicator(&text) {
            debug!(url = %lead.url, reason = "spam", %indicator, "lead rejected");
            return FilterVerdict::Spam { indicator };
        }

        let floor = self.threshold(&lead.category, geography);
        if lead.estimated_value < floor {
            debug!(
                url = %lead.url,
                reason = "below_floor",
                value = lead.estimated_value,
                floor,
                category = %lead.category,
                "lead rejected"
            );
            return FilterVerdict::BelowFloor {
                value: lead.estimated_value,
                floor,
            };
        }

        FilterVerdict::Pass
    }

    pub fn passes(&self, lead: &QualifiedLead, geography: &str) -> bool {
        self.evaluate(lead, geography).is_pass()
    }
}
