//! Local classified-ads source (gigs and labor sections).

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::Html;
use url::Url;

use leadscout_scoring::largest_dollar_figure;
use leadscout_shared::{
    CandidateListing, CapabilityProfile, ClassifiedsSourceConfig, LeadScoutError, Result,
};

use super::{
    ListingSite, ListingStub, SearchQuery, SourceAdapter, doc_attr, doc_text, element_text,
    first_text, run_search, selector,
};
use crate::posted::parse_posted;
use crate::session::AutomationSession;
use crate::tables::SourceTables;

pub const SOURCE_ID: &str = "classifieds";

/// Posting pages end in a numeric id: `/lbg/d/some-slug/7712345678.html`.
static POSTING_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\d+\.html$").expect("valid posting path regex"));

const BOILERPLATE: &str = "QR Code Link to This Post";

pub struct ClassifiedsAdapter {
    base_url: String,
    tables: Arc<SourceTables>,
}

impl ClassifiedsAdapter {
    /// `base_url` may contain `{site}`, replaced by the region's site slug.
    pub fn new(config: &ClassifiedsSourceConfig, tables: Arc<SourceTables>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tables,
        }
    }

    fn search_url(&self, site: &str, section: &str, query: &str) -> Result<Url> {
        let base = self.base_url.replace("{site}", site);
        let mut url = Url::parse(&format!("{base}/search/{section}"))
            .map_err(|e| LeadScoutError::config(format!("invalid classifieds base url '{base}': {e}")))?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("sort", "date");
        Ok(url)
    }
}

impl ListingSite for ClassifiedsAdapter {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    /// Primary categories get one query per term in their narrow section.
    /// Secondary categories get a single OR-query in the broad section.
    fn build_queries(&self, geography: &str, profile: &CapabilityProfile) -> Result<Vec<SearchQuery>> {
        let (site, _) = self.tables.classifieds_region(geography);
        if site.is_empty() {
            return Err(LeadScoutError::validation(format!(
                "no classifieds region for geography '{geography}'"
            )));
        }

        let mut queries = Vec::new();
        for category in profile.categories() {
            let terms = self.tables.terms_for(category);
            if profile.is_primary(category) {
                for term in &terms.terms {
                    queries.push(SearchQuery {
                        url: self.search_url(&site, &terms.primary_section, term)?,
                        category: category.to_string(),
                        terms: vec![term.clone()],
                    });
                }
            } else {
                let joined = terms.terms.join(" | ");
                queries.push(SearchQuery {
                    url: self.search_url(&site, &terms.secondary_section, &joined)?,
                    category: category.to_string(),
                    terms: terms.terms.clone(),
                });
            }
        }
        Ok(queries)
    }

    fn region_min_value(&self, geography: &str) -> f64 {
        self.tables.classifieds_region(geography).1
    }

    fn parse_search_page(&self, html: &str, page_url: &Url, query: &SearchQuery) -> Vec<ListingStub> {
        let doc = Html::parse_document(html);
        let rows = selector("li.cl-static-search-result, li.result-row, li.cl-search-result");
        let link = selector("a[href]");

        let mut stubs = Vec::new();
        for row in doc.select(&rows) {
            let Some(href) = row
                .select(&link)
                .next()
                .and_then(|a| a.value().attr("href"))
            else {
                continue;
            };
            let Ok(url) = page_url.join(href) else {
                continue;
            };

            let title = row
                .value()
                .attr("title")
                .map(str::to_string)
                .or_else(|| first_text(row, ".title, .result-title, .posting-title"))
                .unwrap_or_default();
            let price_text = first_text(row, ".price, .result-price, .priceinfo").unwrap_or_default();
            let time_sel = selector("time[datetime]");
            let posted_text = row
                .select(&time_sel)
                .next()
                .and_then(|t| t.value().attr("datetime").map(str::to_string))
                .or_else(|| first_text(row, ".meta .date, .result-date"))
                .unwrap_or_default();

            stubs.push(ListingStub {
                url,
                stated_value: largest_dollar_figure(&price_text),
                title,
                price_text,
                posted_text,
                location: first_text(row, ".location, .result-hood")
                    .map(|l| l.trim_matches(|c| c == '(' || c == ')').trim().to_string()),
                category: query.category.clone(),
                terms: query.terms.clone(),
            });
        }
        stubs
    }

    fn is_listing_url(&self, url: &Url) -> bool {
        let path = url.path();
        !path.contains("/search") && POSTING_PATH_RE.is_match(path)
    }

    fn parse_detail(&self, html: &str, stub: &ListingStub, now: DateTime<Utc>) -> Result<CandidateListing> {
        let doc = Html::parse_document(html);

        let title = doc_text(&doc, "#titletextonly")
            .or_else(|| doc_text(&doc, "h1"))
            .unwrap_or_else(|| stub.title.clone());
        let description = doc_text(&doc, "#postingbody")
            .map(|d| d.replace(BOILERPLATE, "").trim().to_string())
            .unwrap_or_default();
        if title.is_empty() && description.is_empty() {
            return Err(LeadScoutError::extraction(
                stub.url.as_str(),
                "posting has neither title nor body",
            ));
        }

        let compensation_text = doc_text(&doc, ".postingtitletext .price, .price")
            .or_else(|| compensation_attr(&doc))
            .unwrap_or_else(|| stub.price_text.clone());
        let stated_value = largest_dollar_figure(&compensation_text).or(stub.stated_value);

        let posted_text = doc_attr(&doc, ".postinginfos time[datetime], time.date[datetime]", "datetime")
            .unwrap_or_else(|| stub.posted_text.clone());
        let posted_at = parse_posted(&posted_text, now);

        let contact_text = doc_text(&doc, ".reply-tel-number, .reply-email-address")
            .or_else(|| doc_attr(&doc, r#"a[href^="tel:"], a[href^="mailto:"]"#, "href"))
            .or_else(|| {
                doc.select(&selector(".reply-button, button.reply-button"))
                    .next()
                    .map(|_| "reply through listing".to_string())
            });

        let location = doc_text(&doc, ".mapaddress")
            .or_else(|| {
                doc_text(&doc, ".postingtitletext small")
                    .map(|l| l.trim_matches(|c| c == '(' || c == ')').trim().to_string())
            })
            .or_else(|| stub.location.clone())
            .filter(|l| !l.is_empty());

        Ok(CandidateListing {
            source_id: SOURCE_ID.to_string(),
            url: stub.url.to_string(),
            title,
            description,
            compensation_text,
            stated_value,
            posted_text,
            posted_at,
            contact_text,
            location,
            category_hint: Some(stub.category.clone()),
            matched_terms: stub.terms.clone(),
        })
    }
}

/// `compensation: $400` from the attribute group.
fn compensation_attr(doc: &Html) -> Option<String> {
    let spans = selector(".attrgroup span");
    doc.select(&spans).map(element_text).find_map(|t| {
        t.strip_prefix("compensation:")
            .map(|rest| rest.trim().to_string())
            .filter(|rest| !rest.is_empty())
    })
}

#[async_trait]
impl SourceAdapter for ClassifiedsAdapter {
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
