//! Composite relevance scoring and top-N selection.

use std::cmp::Ordering;

use leadscout_shared::{QualifiedLead, RankingWeights};

/// Combines quality, recency, value, and urgency into one score.
#[derive(Debug, Clone, Default)]
pub struct CompositeRanker {
    weights: RankingWeights,
}

impl CompositeRanker {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// `quality*wq + recency*wr + (value/divisor)*wv + (urgency*unit)*wu`, clamped to `[0, 100]`.
    pub fn relevance(&self, lead: &QualifiedLead) -> f64 {
        let w = &self.weights;
        let divisor = if w.value_divisor > 0.0 { w.value_divisor } else { 1.0 };
        let raw = lead.quality_score * w.quality
            + f64::from(lead.recency_score) * w.recency
            + (lead.estimated_value / divisor) * w.value
            + (lead.urgency_indicators.len() as f64 * w.urgency_unit) * w.urgency;

        if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 100.0) }
    }

    /// Score every lead, sort best-first, keep `max_results`.
    pub fn rank(&self, mut leads: Vec<QualifiedLead>, max_results: usize) -> Vec<QualifiedLead> {
        for lead in &mut leads {
            lead.relevance_score = self.relevance(lead);
        }
        leads.sort_by(compare_leads);
        leads.truncate(max_results);
        leads
    }
}

/// Relevance desc, then recency desc, then value desc, then URL asc.
pub fn compare_leads(a: &QualifiedLead, b: &QualifiedLead) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then_with(|| b.recency_score.cmp(&a.recency_score))
        .then_with(|| b.estimated_value.total_cmp(&a.estimated_value))
        .then_with(|| a.url.cmp(&b.url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::lead;

    #[test]
    fn reference_formula() {
        let ranker = CompositeRanker::default();
        let mut l = lead("https://x.test/1.html", "drywall", 400.0, 8);
        l.quality_score = 70.0;
        l.urgency_indicators = vec!["asap".into()];
        // 70*0.4 + 8*0.3 + 40*0.2 + 10*0.1
        let expected = 28.0 + 2.4 + 8.0 + 1.0;
        assert!((ranker.relevance(&l) - expected).abs() < 1e-9);
    }

    #[test]
    fn relevance_is_clamped() {
        let ranker = CompositeRanker::default();
        let l = lead("https://x.test/2.html", "kitchen", 250_000.0, 10);
        assert_eq!(ranker.relevance(&l), 100.0);
    }

    #[test]
    fn ties_break_on_recency_then_value() {
        let ranker = CompositeRanker::new(RankingWeights {
            quality: 0.0,
            recency: 0.0,
            value: 0.0,
            urgency: 0.0,
            ..RankingWeights::default()
        });
        let leads = vec![
            lead("https://x.test/a.html", "drywall", 500.0, 6),
            lead("https://x.test/b.html", "drywall", 900.0, 8),
            lead("https://x.test/c.html", "drywall", 700.0, 8),
        ];
        let ranked = ranker.rank(leads, 10);
        let urls: Vec<&str> = ranked.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://x.test/b.html", "https://x.test/c.html", "https://x.test/a.html"]
        );
    }

    #[test]
    fn truncates_to_max_results() {
        let ranker = CompositeRanker::default();
        let leads = (0..7)
            .map(|i| lead(&format!("https://x.test/{i}.html"), "painting", 1_000.0 + i as f64, 6))
            .collect();
        let ranked = ranker.rank(leads, 3);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.windows(2).all(|w| compare_leads(&w[0], &w[1]) != Ordering::Greater));
        assert!(ranker.rank(Vec::new(), 3).is_empty());
    }
}
