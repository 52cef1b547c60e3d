//! Scoring, filtering, and ranking of candidate listings.
//!
//! This crate provides:
//! - [`recency`]: decay-bucketed recency score
//! - [`value`]: dollar estimates from stated compensation or category baselines
//! - [`filter`]: spam rejection and geography/category value floors
//! - [`quality`]: completeness score, urgency phrases, category assignment
//! - [`ranker`]: composite relevance and top-N selection
//! - [`LeadScorer`]: all of the above applied to a batch of candidates

pub mod filter;
pub mod quality;
pub mod ranker;
pub mod recency;
pub mod value;

use chrono::{DateTime, Utc};
use leadscout_shared::{
    CandidateListing, CategoryBaseline, QualifiedLead, Result, ScoringConfig,
};
use tracing::debug;
use uuid::Uuid;

pub use filter::{FilterVerdict, QualityFilter, ValueFloors};
pub use quality::{assign_category, quality_score, urgency_indicators};
pub use ranker::{CompositeRanker, compare_leads};
pub use recency::{recency_score, score_age_hours};
pub use value::{ValueEstimate, ValueEstimator, ValueSource, largest_dollar_figure};

/// Per-run inputs to qualification.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub geography: String,
    /// Requested categories, used for category assignment.
    pub categories: Vec<String>,
    /// Contractor's own minimum project value.
    pub minimum_value: f64,
    pub now: DateTime<Utc>,
}

/// Result of qualifying a batch of candidates.
#[derive(Debug, Clone, Default)]
pub struct QualificationOutcome {
    pub leads: Vec<QualifiedLead>,
    pub spam_removed: usize,
    pub below_floor_removed: usize,
}

/// Scores candidates, filters them, and ranks the survivors.
#[derive(Debug, Clone)]
pub struct LeadScorer {
    estimator: ValueEstimator,
    filter: QualityFilter,
    ranker: CompositeRanker,
    urgency_phrases: Vec<String>,
    baselines: Vec<CategoryBaseline>,
}

impl LeadScorer {
    pub fn from_config(config: &ScoringConfig) -> Result<Self> {
        Ok(Self {
            estimator: ValueEstimator::from_config(config),
            filter: QualityFilter::from_config(config)?,
            ranker: CompositeRanker::new(config.weights.clone()),
            urgency_phrases: config.urgency_phrases.clone(),
            baselines: config.baselines.clone(),
        })
    }

    pub fn filter(&self) -> &QualityFilter {
        &self.filter
    }

    pub fn ranker(&self) -> &CompositeRanker {
        &self.ranker
    }

    /// Derive every scored field of a lead. Relevance is filled in by [`rank`](Self::rank).
    pub fn score_listing(
        &self,
        listing: CandidateListing,
        categories: &[String],
        now: DateTime<Utc>,
    ) -> QualifiedLead {
        let estimate = self.estimator.estimate_listing(
            listing.stated_value,
            &listing.description,
            &listing.compensation_text,
        );

        let text = listing.combined_text();
        let urgency = urgency_indicators(&text, &self.urgency_phrases);
        let category = assign_category(&listing, categories, &self.baselines);
        let quality = quality_score(&listing);
        let recency = recency_score(listing.posted_at, now);

        QualifiedLead {
            id: Uuid::now_v7().to_string(),
            source_id: listing.source_id,
            url: listing.url,
            title: listing.title,
            description: listing.description,
            compensation_text: listing.compensation_text,
            posted_text: listing.posted_text,
            posted_at: listing.posted_at,
            contact_text: listing.contact_text,
            location: listing.location,
            recency_score: recency,
            estimated_value: estimate.value,
            value_confident: estimate.is_confident(),
            quality_score: quality,
            urgency_indicators: urgency,
            relevance_score: 0.0,
            matched_terms: listing.matched_terms,
            category,
        }
    }

    /// Score and filter a batch. Survivors are unranked.
    pub fn qualify_all(
        &self,
        listings: Vec<CandidateListing>,
        ctx: &ScoringContext,
    ) -> QualificationOutcome {
        let filter = self.filter.clone().with_minimum_value(ctx.minimum_value);
        let mut outcome = QualificationOutcome::default();

        for listing in listings {
            let lead = self.score_listing(listing, &ctx.categories, ctx.now);
            match filter.evaluate(&lead, &ctx.geography) {
                FilterVerdict::Pass => outcome.leads.push(lead),
                FilterVerdict::Spam { .. } => outcome.spam_removed += 1,
                FilterVerdict::BelowFloor { .. } => outcome.below_floor_removed += 1,
            }
        }

        debug!(
            qualified = outcome.leads.len(),
            spam_removed = outcome.spam_removed,
            below_floor_removed = outcome.below_floor_removed,
            "qualification finished"
        );
        outcome
    }

    /// Composite-score, sort, and truncate.
    pub fn rank(&self, leads: Vec<QualifiedLead>, max_results: usize) -> Vec<QualifiedLead> {
        self.ranker.rank(leads, max_results)
    }
}
