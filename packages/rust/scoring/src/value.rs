//! Heuristic dollar estimates from free-text compensation and descriptions.

use std::sync::LazyLock;

use leadscout_shared::{CategoryBaseline, ScoringConfig};
use regex::Regex;

/// `$1,200`, `$850.50`, `$15k`.
static DOLLAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s*(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?\s*([kK]\b)?").unwrap()
});

/// Where an estimate came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// A price the listing source stated as a field.
    Stated,
    /// A dollar figure parsed out of the compensation text.
    Parsed,
    /// A category baseline with scope/urgency multipliers applied.
    Baseline { category: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueEstimate {
    pub value: f64,
    pub source: ValueSource,
}

impl ValueEstimate {
    /// Whether the value came from the listing rather than a baseline.
    pub fn is_confident(&self) -> bool {
        matches!(self.source, ValueSource::Stated | ValueSource::Parsed)
    }
}

/// Parses stated compensation or falls back to category baselines.
#[derive(Debug, Clone)]
pub struct ValueEstimator {
    sanity_floor: f64,
    default_baseline: f64,
    baselines: Vec<CategoryBaseline>,
    large_scope_terms: Vec<String>,
    small_scope_terms: Vec<String>,
    large_scope_multiplier: f64,
    small_scope_multiplier: f64,
    urgency_multiplier: f64,
    urgency_phrases: Vec<String>,
}

impl ValueEstimator {
    pub fn from_config(config: &ScoringConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        Self {
            sanity_floor: config.sanity_floor,
            default_baseline: config.default_baseline,
            baselines: config
                .baselines
                .iter()
                .map(|b| CategoryBaseline {
                    category: b.category.clone(),
                    keywords: lower(&b.keywords),
                    value: b.value,
                })
                .collect(),
            large_scope_terms: lower(&config.large_scope_terms),
            small_scope_terms: lower(&config.small_scope_terms),
            large_scope_multiplier: config.large_scope_multiplier,
            small_scope_multiplier: config.small_scope_multiplier,
            urgency_multiplier: config.urgency_multiplier,
            urgency_phrases: lower(&config.urgency_phrases),
        }
    }

    /// Estimate a listing that may carry a stated price.
    ///
    /// The stated price is held to the same sanity floor as a parsed figure;
    /// below it the compensation text and then the baselines are tried.
    pub fn estimate_listing(
        &self,
        stated: Option<f64>,
        description: &str,
        raw_compensation: &str,
    ) -> ValueEstimate {
        match stated {
            Some(value) if value > self.sanity_floor => ValueEstimate {
                value,
                source: ValueSource::Stated,
            },
            _ => self.estimate(description, raw_compensation),
        }
    }

    /// Estimate the project value of a listing.
    ///
    /// A dollar figure in `raw_compensation` above the sanity floor is used
    /// as-is. Otherwise the first baseline whose keyword appears in the
    /// combined text is scaled by every matching scope/urgency multiplier.
    pub fn estimate(&self, description: &str, raw_compensation: &str) -> ValueEstimate {
        if let Some(value) = largest_dollar_figure(raw_compensation) {
            if value > self.sanity_floor {
                return ValueEstimate {
                    value,
                    source: ValueSource::Parsed,
                };
            }
        }

        let text = format!("{description} {raw_compensation}").to_lowercase();

        let baseline = self
            .baselines
            .iter()
            .find(|b| b.keywords.iter().any(|k| text.contains(k.as_str())));

        let mut value = baseline.map(|b| b.value).unwrap_or(self.default_baseline);

        if contains_any(&text, &self.large_scope_terms) {
            value *= self.large_scope_multiplier;
        }
        if contains_any(&text, &self.small_scope_terms) {
            value *= self.small_scope_multiplier;
        }
        if contains_any(&text, &self.urgency_phrases) {
            value *= self.urgency_multiplier;
        }

        ValueEstimate {
            value: value.round(),
            source: ValueSource::Baseline {
                category: baseline.map(|b| b.category.clone()),
            },
        }
    }
}

/// The largest dollar amount mentioned in `text`, if any.
pub fn largest_dollar_figure(text: &str) -> Option<f64> {
    DOLLAR_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
            let cents: f64 = caps
                .get(2)
                .and_then(|c| format!("0.{}", c.as_str()).parse().ok())
                .unwrap_or(0.0);
            let scale = if caps.get(3).is_some() { 1_000.0 } else { 1.0 };
            Some((whole + cents) * scale)
        })
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
}

pub(crate) fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}
