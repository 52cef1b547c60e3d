//! Listing completeness, urgency phrases, and category assignment.

use leadscout_shared::{CandidateListing, CategoryBaseline};

/// Starting point before completeness signals are added.
const BASE_QUALITY: f64 = 40.0;

/// Descriptions at least this long count as detailed.
const DETAILED_DESCRIPTION_CHARS: usize = 120;

/// Completeness score in `[0, 100]`.
///
/// Contact method +15, detailed description +10, explicit compensation +10,
/// precise location +10, posting time +5, title matching a search term +10.
pub fn quality_score(listing: &CandidateListing) -> f64 {
    let mut score = BASE_QUALITY;

    if listing
        .contact_text
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty())
    {
        score += 15.0;
    }
    if listing.description.trim().chars().count() >= DETAILED_DESCRIPTION_CHARS {
        score += 10.0;
    }
    if listing.stated_value.is_some() || !listing.compensation_text.trim().is_empty() {
        score += 10.0;
    }
    if listing
        .location
        .as_deref()
        .is_some_and(|l| !l.trim().is_empty())
    {
        score += 10.0;
    }
    if listing.posted_at.is_some() {
        score += 5.0;
    }

    let title = listing.title.to_lowercase();
    if listing
        .matched_terms
        .iter()
        .any(|t| !t.is_empty() && title.contains(&t.to_lowercase()))
    {
        score += 10.0;
    }

    score.clamp(0.0, 100.0)
}

/// Urgency phrases present in `text`, each reported once, in config order.
pub fn urgency_indicators(text: &str, phrases: &[String]) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut found: Vec<String> = Vec::new();
    for phrase in phrases {
        let p = phrase.to_lowercase();
        if !p.is_empty() && lower.contains(&p) && !found.contains(&p) {
            found.push(p);
        }
    }
    found
}

/// Pick the requested category that best matches the listing text.
///
/// Counts the category name and its baseline keywords in title + description.
/// Ties keep request order. With no hits, falls back to the query's category,
/// then to the first requested category.
pub fn assign_category(
    listing: &CandidateListing,
    requested: &[String],
    baselines: &[CategoryBaseline],
) -> String {
    let text = listing.combined_text().to_lowercase();

    let mut best: Option<(&str, usize)> = None;
    for category in requested {
        let name = category.to_lowercase().replace('_', " ");
        let mut hits = usize::from(text.contains(&name));
        if let Some(b) = baselines
            .iter()
            .find(|b| b.category.eq_ignore_ascii_case(category))
        {
            hits += b
                .keywords
                .iter()
                .filter(|k| text.contains(&k.to_lowercase()))
                .count();
        }
        if hits > 0 && best.is_none_or(|(_, h)| hits > h) {
            best = Some((category.as_str(), hits));
        }
    }

    if let Some((category, _)) = best {
        return category.to_string();
    }
    listing
        .category_hint
        .clone()
        .or_else(|| requested.first().cloned())
        .unwrap_or_else(|| "general".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leadscout_shared::ScoringConfig;

    fn listing() -> CandidateListing {
        CandidateListing {
            source_id: "classifieds".into(),
            url: "https://austin.example.org/lbg/d/roof-repair/7712.html".into(),
            title: "Roof repair needed".into(),
            description: "Shingles blew off in the storm".into(),
            ..Default::default()
        }
    }

    #[test]
    fn bare_listing_scores_base() {
        assert_eq!(quality_score(&listing()), 40.0);
    }

    #[test]
    fn complete_listing_scores_full() {
        let mut l = listing();
        l.contact_text = Some("call 512-555-0100".into());
        l.description = "x".repeat(150);
        l.compensation_text = "$4,000".into();
        l.location = Some("Austin, TX 78704".into());
        l.posted_at = Some(Utc::now());
        l.matched_terms = vec!["roof repair".into()];
        assert_eq!(quality_score(&l), 100.0);
    }

    #[test]
    fn urgency_phrases_are_deduplicated() {
        let phrases = ScoringConfig::default().urgency_phrases;
        let found = urgency_indicators("URGENT!! need it today, urgent please", &phrases);
        assert_eq!(found, vec!["urgent".to_string(), "today".to_string()]);
        assert!(urgency_indicators("whenever works", &phrases).is_empty());
    }

    #[test]
    fn category_by_keyword_hits() {
        let baselines = ScoringConfig::default().baselines;
        let requested = vec!["drywall".to_string(), "roofing".to_string()];
        assert_eq!(assign_category(&listing(), &requested, &baselines), "roofing");
    }

    #[test]
    fn category_falls_back_to_hint_then_first() {
        let baselines = ScoringConfig::default().baselines;
        let requested = vec!["painting".to_string(), "plumbing".to_string()];
        let mut l = listing();
        l.title = "Odd job".into();
        l.description = "Help needed".into();
        assert_eq!(assign_category(&l, &requested, &baselines), "painting");
        l.category_hint = Some("plumbing".into());
        assert_eq!(assign_category(&l, &requested, &baselines), "plumbing");
    }
}
