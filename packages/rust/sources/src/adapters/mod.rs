//! Source adapter trait and the built-in listing sources.
//!
//! Every adapter runs the same two-phase search: load search pages built from
//! the capability profile, then load the detail page of every surviving
//! listing. The per-source parts live behind [`ListingSite`].

mod classifieds;
mod government;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use leadscout_scoring::{largest_dollar_figure, recency_score};
use leadscout_shared::{CandidateListing, CapabilityProfile, LeadScoutError, Result, SourcesConfig};

use crate::posted::parse_posted;
use crate::session::AutomationSession;
use crate::tables::SourceTables;

pub use classifieds::ClassifiedsAdapter;
pub use government::GovernmentContractsAdapter;

/// How many search-page listings per requested result get a detail load.
const DETAIL_POOL_FACTOR: usize = 3;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A listing source the pipeline can search.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier stored with every lead.
    fn id(&self) -> &str;

    /// Search this source for listings matching `profile` in `geography`.
    ///
    /// Returns at most `max_results` listings, sorted by local recency × value.
    /// Fails with `SourceUnavailable` only when every search query failed;
    /// a failed detail page drops just that listing.
    async fn search_leads(
        &self,
        session: &AutomationSession,
        geography: &str,
        profile: &CapabilityProfile,
        max_results: usize,
    ) -> Result<Vec<CandidateListing>>;
}

/// Adapters enabled in `config`, in search order.
pub fn default_adapters(
    config: &SourcesConfig,
    tables: Arc<SourceTables>,
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    if config.classifieds.enabled {
        adapters.push(Arc::new(ClassifiedsAdapter::new(
            &config.classifieds,
            tables.clone(),
        )));
    }
    if config.government.enabled {
        adapters.push(Arc::new(GovernmentContractsAdapter::new(
            &config.government,
            tables,
        )));
    }
    adapters
}

// ---------------------------------------------------------------------------
// Two-phase search
// ---------------------------------------------------------------------------

/// One search-page load.
#[derive(Debug, Clone)]
pub(crate) struct SearchQuery {
    pub url: Url,
    pub category: String,
    pub terms: Vec<String>,
}

/// A listing as seen on a search page, before its detail page is loaded.
#[derive(Debug, Clone)]
pub(crate) struct ListingStub {
    pub url: Url,
    pub title: String,
    pub price_text: String,
    pub stated_value: Option<f64>,
    pub posted_text: String,
    pub location: Option<String>,
    pub category: String,
    pub terms: Vec<String>,
}

/// The source-specific half of an adapter.
pub(crate) trait ListingSite: Send + Sync {
    fn source_id(&self) -> &str;

    fn build_queries(&self, geography: &str, profile: &CapabilityProfile) -> Result<Vec<SearchQuery>>;

    /// Stated prices under this are skipped before any detail load.
    fn region_min_value(&self, geography: &str) -> f64;

    fn parse_search_page(&self, html: &str, page_url: &Url, query: &SearchQuery) -> Vec<ListingStub>;

    /// Whether `url` points at an individual posting rather than a search page.
    fn is_listing_url(&self, url: &Url) -> bool;

    fn parse_detail(&self, html: &str, stub: &ListingStub, now: DateTime<Utc>) -> Result<CandidateListing>;
}

pub(crate) async fn run_search<S: ListingSite>(
    site: &S,
    session: &AutomationSession,
    geography: &str,
    profile: &CapabilityProfile,
    max_results: usize,
) -> Result<Vec<CandidateListing>> {
    let source_id = site.source_id().to_string();
    let queries = site.build_queries(geography, profile)?;
    let region_min = site.region_min_value(geography);

    let mut stubs: Vec<ListingStub> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_error: Option<LeadScoutError> = None;
    let mut failed = 0usize;

    for query in &queries {
        let label = format!("{source_id} search {}", query.category);
        let html = match session.load_page(&query.url, &label).await {
            Ok(html) => html,
            Err(e) => {
                warn!(source = %source_id, url = %query.url, error = %e, "search query failed");
                failed += 1;
                last_error = Some(e);
                continue;
            }
        };

        for stub in site.parse_search_page(&html, &query.url, query) {
            if !site.is_listing_url(&stub.url) {
                debug!(url = %stub.url, "rejected non-listing url");
                continue;
            }
            if stub.stated_value.is_some_and(|v| v < region_min) {
                debug!(url = %stub.url, region_min, "stated price under region minimum");
                continue;
            }
            if seen.insert(stub.url.to_string()) {
                stubs.push(stub);
            }
        }
    }

    if !queries.is_empty() && failed == queries.len() {
        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no search query succeeded".into());
        return Err(LeadScoutError::source_unavailable(source_id, message));
    }

    let now = Utc::now();
    stubs.sort_by(|a, b| {
        stub_priority(b, now)
            .total_cmp(&stub_priority(a, now))
            .then_with(|| a.url.as_str().cmp(b.url.as_str()))
    });
    stubs.truncate(max_results.saturating_mul(DETAIL_POOL_FACTOR));

    let mut listings = Vec::with_capacity(stubs.len());
    for stub in &stubs {
        let label = format!("{source_id} detail");
        let result = match session.load_page(&stub.url, &label).await {
            Ok(html) => site.parse_detail(&html, stub, now),
            Err(e) => Err(LeadScoutError::extraction(stub.url.as_str(), e.to_string())),
        };
        match result {
            Ok(listing) => listings.push(listing),
            Err(e) => warn!(source = %source_id, url = %stub.url, error = %e, "skipping listing"),
        }
    }

    let listings = sort_and_cap(listings, now, max_results);
    info!(
        source = %source_id,
        queries = queries.len(),
        failed_queries = failed,
        listings = listings.len(),
        "source search finished"
    );
    Ok(listings)
}

fn stub_priority(stub: &ListingStub, now: DateTime<Utc>) -> f64 {
    let recency = recency_score(parse_posted(&stub.posted_text, now), now);
    let value = stub
        .stated_value
        .or_else(|| largest_dollar_figure(&stub.price_text))
        .unwrap_or(1.0);
    f64::from(recency) * value
}

/// Local recency × value ordering, capped at `max_results`.
pub fn sort_and_cap(
    mut listings: Vec<CandidateListing>,
    now: DateTime<Utc>,
    max_results: usize,
) -> Vec<CandidateListing> {
    let priority = |l: &CandidateListing| {
        let value = l
            .stated_value
            .or_else(|| largest_dollar_figure(&l.compensation_text))
            .unwrap_or(1.0);
        f64::from(recency_score(l.posted_at, now)) * value
    };
    listings.sort_by(|a, b| {
        priority(b)
            .total_cmp(&priority(a))
            .then_with(|| a.url.cmp(&b.url))
    });
    listings.truncate(max_results);
    listings
}

// ---------------------------------------------------------------------------
// HTML helpers
// ---------------------------------------------------------------------------

/// Parse a static selector literal.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|_| panic!("invalid static selector: {css}"))
}

/// Element text with whitespace collapsed.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first match of `css` under `scope`, if non-empty.
pub(crate) fn first_text(scope: ElementRef<'_>, css: &str) -> Option<String> {
    let sel = selector(css);
    scope
        .select(&sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Same as [`first_text`] over a whole document.
pub(crate) fn doc_text(doc: &Html, css: &str) -> Option<String> {
    first_text(doc.root_element(), css)
}

/// Attribute of the first match of `css` in `doc`.
pub(crate) fn doc_attr(doc: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css);
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
