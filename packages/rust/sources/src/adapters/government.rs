//! Government contract opportunities, searched by industry and set-aside codes.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::Html;
use url::Url;

use leadscout_scoring::largest_dollar_figure;
use leadscout_shared::{
    CandidateListing, CapabilityProfile, GovernmentSourceConfig, LeadScoutError, Result,
};

use super::{
    ListingSite, ListingStub, SearchQuery, SourceAdapter, doc_attr, doc_text, first_text,
    run_search, selector,
};
use crate::posted::parse_posted;
use crate::session::AutomationSession;
use crate::tables::SourceTables;

pub const SOURCE_ID: &str = "government_contracts";

static OPPORTUNITY_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/opp/[A-Za-z0-9_-]+/view/?$").expect("valid opportunity path regex"));

pub struct GovernmentContractsAdapter {
    base_url: String,
    tables: Arc<SourceTables>,
}

impl GovernmentContractsAdapter {
    pub fn new(config: &GovernmentSourceConfig, tables: Arc<SourceTables>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tables,
        }
    }

    fn search_url(&self, codes: &[String], keywords: Option<&str>, state: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/search/", self.base_url)).map_err(|e| {
            LeadScoutError::config(format!("invalid government base url '{}': {e}", self.base_url))
        })?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("index", "opp")
                .append_pair("naics", &codes.join(","))
                .append_pair("setAside", &self.tables.set_aside_codes.join(","))
                .append_pair("sort", "-modifiedDate");
            if let Some(k) = keywords {
                q.append_pair("keywords", k);
            }
            if let Some(s) = state {
                q.append_pair("pop", s);
            }
        }
        Ok(url)
    }
}

/// Award amounts arrive as `$1,250,000.00`, `1250000`, or `1,250,000`.
pub(crate) fn coerce_amount(text: &str) -> Option<f64> {
    if let Some(v) = largest_dollar_figure(text) {
        return Some(v);
    }
    let digits: String = text
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() || text.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    digits.parse::<f64>().ok().filter(|v| *v > 0.0)
}

impl ListingSite for GovernmentContractsAdapter {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    /// Each primary category searches its own codes with its lead term.
    /// Secondary categories share one query over their combined codes.
    fn build_queries(&self, geography: &str, profile: &CapabilityProfile) -> Result<Vec<SearchQuery>> {
        let (state, _) = self.tables.government_region(geography);
        let state = state.as_deref();

        let mut queries = Vec::new();
        let mut secondary_codes: Vec<String> = Vec::new();
        let mut secondary_terms: Vec<String> = Vec::new();
        let mut secondary_categories: Vec<&str> = Vec::new();

        for category in profile.categories() {
            let codes = self.tables.industry_codes_for(category);
            let terms = self.tables.terms_for(category).terms;
            if profile.is_primary(category) {
                let keyword = terms.first().map(String::as_str);
                queries.push(SearchQuery {
                    url: self.search_url(&codes, keyword, state)?,
                    category: category.to_string(),
                    terms: terms.iter().take(1).cloned().collect(),
                });
            } else {
                for code in codes {
                    if !secondary_codes.contains(&code) {
                        secondary_codes.push(code);
                    }
                }
                secondary_terms.extend(terms);
                secondary_categories.push(category);
            }
        }

        if let Some(first) = secondary_categories.first() {
            queries.push(SearchQuery {
                url: self.search_url(&secondary_codes, None, state)?,
                category: first.to_string(),
                terms: secondary_terms,
            });
        }
        Ok(queries)
    }

    fn region_min_value(&self, geography: &str) -> f64 {
        self.tables.government_region(geography).1
    }

    fn parse_search_page(&self, html: &str, page_url: &Url, query: &SearchQuery) -> Vec<ListingStub> {
        let doc = Html::parse_document(html);
        let rows = selector(".search-result, .opportunity-row");
        let link = selector("a.opportunity-link[href], h3 a[href]");

        let mut stubs = Vec::new();
        for row in doc.select(&rows) {
            let Some(anchor) = row.select(&link).next() else {
                continue;
            };
            let Some(url) = anchor
                .value()
                .attr("href")
                .and_then(|href| page_url.join(href).ok())
            else {
                continue;
            };

            let price_text = first_text(row, ".award-amount, .estimated-value").unwrap_or_default();
            stubs.push(ListingStub {
                url,
                title: super::element_text(anchor),
                stated_value: coerce_amount(&price_text),
                price_text,
                posted_text: first_text(row, ".posted-date, .published-date").unwrap_or_default(),
                location: first_text(row, ".place-of-performance"),
                category: query.category.clone(),
                terms: query.terms.clone(),
            });
        }
        stubs
    }

    fn is_listing_url(&self, url: &Url) -> bool {
        OPPORTUNITY_PATH_RE.is_match(url.path())
    }

    fn parse_detail(&self, html: &str, stub: &ListingStub, now: DateTime<Utc>) -> Result<CandidateListing> {
        let doc = Html::parse_document(html);

        let title = doc_text(&doc, "h1.opportunity-title")
            .or_else(|| doc_text(&doc, "h1"))
            .unwrap_or_else(|| stub.title.clone());
        let mut description = doc_text(&doc, ".description, #description").unwrap_or_default();
        if title.is_empty() && description.is_empty() {
            return Err(LeadScoutError::extraction(
                stub.url.as_str(),
                "opportunity has neither title nor description",
            ));
        }
        if let Some(set_aside) = doc_text(&doc, ".set-aside") {
            description = format!("{description}\nSet-aside: {set_aside}").trim().to_string();
        }

        let compensation_text = doc_text(&doc, ".estimated-value, .award-amount")
            .unwrap_or_else(|| stub.price_text.clone());
        let stated_value = coerce_amount(&compensation_text).or(stub.stated_value);

        let posted_text = doc_attr(&doc, "time.published-date[datetime]", "datetime")
            .or_else(|| doc_text(&doc, ".published-date"))
            .unwrap_or_else(|| stub.posted_text.clone());
        let posted_at = parse_posted(&posted_text, now);

        Ok(CandidateListing {
            source_id: SOURCE_ID.to_string(),
            url: stub.url.to_string(),
            title,
            description,
            compensation_text,
            stated_value,
            posted_text,
            posted_at,
            contact_text: doc_text(&doc, ".point-of-contact"),
            location: doc_text(&doc, ".place-of-performance").or_else(|| stub.location.clone()),
            category_hint: Some(stub.category.clone()),
            matched_terms: stub.terms.clone(),
        })
    }
}

#[async_trait]
impl SourceAdapter for GovernmentContractsAdapter {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    #[tracing::instrument(skip_all, fields(source = SOURCE_ID, geography = %geography))]
    async fn search_leads(
        &self,
        session: &AutomationSession,
        geography: &str,
        profile: &CapabilityProfile,
        max_results: usize,
    ) -> Result<Vec<CandidateListing>> {
        run_search(self, session, geography, profile, max_results).await
    }
}
