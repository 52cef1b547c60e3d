//! End-to-end lead discovery run: admit → search sources → qualify → rank → persist.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use leadscout_governor::{Governor, QuotaSummary};
use leadscout_scoring::{LeadScorer, ScoringContext};
use leadscout_shared::{
    AgentType, AppConfig, AutomationConfig, CandidateListing, CapabilityProfile, LeadScoutError,
    QualifiedLead, Result, RunStatus, SearchMetadata, SearchRequest, SearchSession,
    ServiceOffering, SessionId,
};
use leadscout_sources::{AutomationSession, PageLoader, SourceAdapter, SourceTables, default_adapters};
use leadscout_storage::LeadStore;

use crate::progress::{ProgressEvent, ProgressSink, StoreProgress};

/// Upper bound on the slice of the run timeout held back for persisting
/// results and the final progress record. Sources stop early by this much so
/// a timed-out run can still record its partial results inside the ceiling.
const FINALIZE_GRACE_MAX: Duration = Duration::from_secs(30);

/// Longest a single progress write may hold the run.
const EMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Percent reported once the engine is up and before the first source.
const PERCENT_STARTED: u8 = 5;
/// Percent reached after the last source; the rest is qualify and persist.
const PERCENT_SOURCES_DONE: u8 = 85;

// ---------------------------------------------------------------------------
// Request and report
// ---------------------------------------------------------------------------

/// One trigger from the request handler. The account identity is already
/// authenticated by the caller.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub account_id: String,
    pub profile: CapabilityProfile,
    pub search: SearchRequest,
}

/// Structured form of a [`LeadScoutError`] for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

impl From<&LeadScoutError> for ErrorPayload {
    fn from(e: &LeadScoutError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// A source that was skipped during the run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source_id: String,
    #[serde(flatten)]
    pub error: ErrorPayload,
}

/// Aggregate counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub candidates_found: usize,
    pub duplicates_removed: usize,
    pub spam_removed: usize,
    pub below_floor_removed: usize,
    /// Survivors of filtering, before truncation.
    pub qualified: usize,
    pub returned: usize,
    pub average_relevance: f64,
    pub average_value: f64,
}

impl QualityMetrics {
    fn averages(&mut self, leads: &[QualifiedLead]) {
        self.returned = leads.len();
        if leads.is_empty() {
            return;
        }
        let n = leads.len() as f64;
        self.average_relevance = leads.iter().map(|l| l.relevance_score).sum::<f64>() / n;
        self.average_value = leads.iter().map(|l| l.estimated_value).sum::<f64>() / n;
    }
}

/// Everything a caller gets back from a run that was admitted.
///
/// `error` is set for every terminal state other than `completed`; `leads`
/// still holds whatever was ranked before the failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub session: SearchSession,
    pub leads: Vec<QualifiedLead>,
    pub quota: QuotaSummary,
    pub metrics: QualityMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_errors: Vec<SourceFailure>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.session.status
    }

    pub fn is_success(&self) -> bool {
        self.session.status == RunStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs lead discovery for many accounts. Shared across runs; each run gets
/// its own automation session.
pub struct Orchestrator {
    governor: Arc<Governor>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    store: Arc<dyn LeadStore>,
    tracker: StoreProgress,
    scorer: LeadScorer,
    tables: Arc<SourceTables>,
    automation: AutomationConfig,
    loader: Option<Arc<dyn PageLoader>>,
    timeout: Duration,
}

impl Orchestrator {
    /// Orchestrator with the adapters enabled in `config`.
    pub fn new(config: &AppConfig, governor: Arc<Governor>, store: Arc<dyn LeadStore>) -> Result<Self> {
        let tables = Arc::new(SourceTables::default());
        Ok(Self {
            governor,
            adapters: default_adapters(&config.sources, tables.clone()),
            tracker: StoreProgress::new(store.clone()),
            store,
            scorer: LeadScorer::from_config(&config.scoring)?,
            tables,
            automation: config.automation.clone(),
            loader: None,
            timeout: Duration::from_secs(config.defaults.timeout_secs),
        })
    }

    pub fn with_adapters(mut self, adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_tables(mut self, tables: Arc<SourceTables>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use `loader` as the page engine for every run instead of the configured one.
    pub fn with_loader(mut self, loader: Arc<dyn PageLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Execute one run to a terminal state.
    ///
    /// Governor rejections and invalid requests are returned as `Err` before
    /// anything is charged. Once admitted, every outcome is an `Ok` report.
    #[instrument(skip_all, fields(account_id = %req.account_id, geography = tracing::field::Empty, session_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        req: RunRequest,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let plan = self.plan(&req)?;
        let span = tracing::Span::current();
        span.record("geography", plan.geography.as_str());

        let permit = self
            .governor
            .start_session(&req.account_id, plan.profile.tier, AgentType::LeadDiscovery)?;

        let ceiling = Instant::now() + self.timeout;
        let grace = finalize_grace(self.timeout);
        let search_deadline = ceiling - grace;
        // The second half of the grace is left for the final progress record.
        let persist_deadline = ceiling - grace / 2;
        let mut session = SearchSession {
            id: SessionId::new(),
            account_id: req.account_id.clone(),
            agent_type: AgentType::LeadDiscovery,
            categories: plan.categories.clone(),
            geography: plan.geography.clone(),
            quota_charge: 1,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Queued,
        };
        span.record("session_id", session.id.to_string().as_str());
        let reporter = Reporter {
            progress,
            tracker: &self.tracker,
            session_id: session.id,
            tracking_id: req.search.session_tracking_id.clone(),
            started_at: session.started_at,
            ceiling,
        };

        session.status = RunStatus::Running;
        info!(
            categories = ?plan.categories,
            max_results = plan.max_results,
            sources = self.adapters.len(),
            "run started"
        );

        let mut automation = match &self.loader {
            Some(loader) => AutomationSession::with_loader(self.automation.clone(), loader.clone()),
            None => AutomationSession::new(self.automation.clone()),
        };

        let mut metrics = QualityMetrics::default();
        let mut source_errors = Vec::new();
        let mut leads = Vec::new();

        let outcome = match automation.initialize() {
            Err(e) => {
                warn!(error = %e, "automation session failed to start");
                Err(e)
            }
            Ok(()) => {
                reporter.emit(RunStatus::Running, "session ready", PERCENT_STARTED).await;
                let (candidates, outcome) = self
                    .search_sources(&automation, &plan, &reporter, &cancel, search_deadline, &mut source_errors)
                    .await;
                reporter
                    .emit(RunStatus::Running, "qualifying", PERCENT_SOURCES_DONE)
                    .await;
                leads = self.qualify(candidates, &plan, &mut metrics);
                outcome
            }
        };
        automation.cleanup();
        metrics.averages(&leads);

        let (status, error) = match outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => (status_for(&e), Some(e)),
        };
        let (mut status, mut error) = match checked_transition(session.status, status) {
            Ok(status) => (status, error),
            Err(e) => {
                warn!(error = %e, "run ended in an unexpected state");
                (RunStatus::Failed, Some(e))
            }
        };
        session.status = status;
        session.finished_at = Some(Utc::now());

        if let Err(e) = self.persist(&session, &leads, &plan, persist_deadline).await {
            warn!(error = %e, leads = leads.len(), "persisting run failed; returning results anyway");
            status = RunStatus::Failed;
            session.status = status;
            error = Some(e);
        }

        let quota = permit.finish(status);
        reporter.emit(status, status.as_str(), 100).await;

        info!(
            status = %status,
            returned = metrics.returned,
            candidates = metrics.candidates_found,
            sources_failed = source_errors.len(),
            monthly_remaining = quota.monthly_remaining,
            "run finished"
        );

        Ok(RunReport {
            session,
            leads,
            quota,
            metrics,
            error: error.as_ref().map(ErrorPayload::from),
            source_errors,
        })
    }

    // -----------------------------------------------------------------------
    // Run stages
    // -----------------------------------------------------------------------

    /// Resolve the request against the profile, rejecting what cannot run.
    fn plan(&self, req: &RunRequest) -> Result<RunPlan> {
        if req.account_id.trim().is_empty() {
            return Err(LeadScoutError::validation("account id is required"));
        }
        if self.adapters.is_empty() {
            return Err(LeadScoutError::config("no listing sources are enabled"));
        }
        if req.search.max_results == 0 {
            return Err(LeadScoutError::validation("max_results must be at least 1"));
        }

        let geography = match req.search.geography.trim() {
            "" => req.profile.service_area.trim().to_string(),
            g => g.to_string(),
        };
        if geography.is_empty() {
            return Err(LeadScoutError::validation("geography is required"));
        }

        let mut categories: Vec<String> = Vec::new();
        let requested: Vec<String> = if req.search.categories.is_empty() {
            req.profile.categories().into_iter().map(str::to_string).collect()
        } else {
            req.search.categories.clone()
        };
        for c in requested {
            let c = c.trim().to_lowercase();
            if !c.is_empty() && !categories.contains(&c) {
                categories.push(c);
            }
        }
        if categories.is_empty() {
            return Err(LeadScoutError::validation("at least one category is required"));
        }

        // Only the requested categories are searched; primary flags come from
        // the contractor's own profile.
        let profile = CapabilityProfile {
            services: categories
                .iter()
                .map(|c| ServiceOffering {
                    category: c.clone(),
                    primary: req.profile.is_primary(c),
                })
                .collect(),
            service_area: geography.clone(),
            ..req.profile.clone()
        };

        let search_terms = categories
            .iter()
            .flat_map(|c| self.tables.terms_for(c).terms)
            .collect();

        Ok(RunPlan {
            profile,
            geography,
            categories,
            search_terms,
            max_results: req.search.max_results,
            started_at: Utc::now(),
        })
    }

    /// Call each source in order until done, cancelled, or out of time.
    ///
    /// Whatever was collected before a stop is returned alongside the stop reason.
    async fn search_sources(
        &self,
        automation: &AutomationSession,
        plan: &RunPlan,
        reporter: &Reporter<'_>,
        cancel: &CancellationToken,
        deadline: Instant,
        source_errors: &mut Vec<SourceFailure>,
    ) -> (Vec<CandidateListing>, Result<()>) {
        let total = self.adapters.len();
        let mut candidates = Vec::new();

        for (i, adapter) in self.adapters.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(completed_sources = i, "run cancelled between sources");
                return (candidates, Err(LeadScoutError::Cancelled));
            }

            let search = adapter.search_leads(automation, &plan.geography, &plan.profile, plan.max_results);
            let result = tokio::select! {
                r = search => r,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(source = adapter.id(), "timeout reached while searching");
                    return (candidates, Err(LeadScoutError::Timeout { secs: self.timeout.as_secs() }));
                }
            };

            match result {
                Ok(found) => {
                    info!(source = adapter.id(), found = found.len(), "source searched");
                    candidates.extend(found);
                }
                Err(e) => {
                    warn!(source = adapter.id(), error = %e, "source skipped");
                    source_errors.push(SourceFailure {
                        source_id: adapter.id().to_string(),
                        error: ErrorPayload::from(&e),
                    });
                }
            }

            let span = u32::from(PERCENT_SOURCES_DONE - PERCENT_STARTED);
            let percent = PERCENT_STARTED as u32 + span * (i as u32 + 1) / total as u32;
            reporter.emit(RunStatus::Running, adapter.id(), percent as u8).await;
        }

        if source_errors.len() == total {
            let message = source_errors
                .iter()
                .map(|f| f.source_id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return (
                candidates,
                Err(LeadScoutError::source_unavailable(
                    "all",
                    format!("every source failed: {message}"),
                )),
            );
        }
        (candidates, Ok(()))
    }

    fn qualify(
        &self,
        candidates: Vec<CandidateListing>,
        plan: &RunPlan,
        metrics: &mut QualityMetrics,
    ) -> Vec<QualifiedLead> {
        metrics.candidates_found = candidates.len();

        let mut seen = HashSet::new();
        let unique: Vec<CandidateListing> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.url.clone()))
            .collect();
        metrics.duplicates_removed = metrics.candidates_found - unique.len();

        let ctx = ScoringContext {
            geography: plan.geography.clone(),
            categories: plan.categories.clone(),
            minimum_value: plan.profile.min_project_value,
            now: Utc::now(),
        };
        let outcome = self.scorer.qualify_all(unique, &ctx);
        metrics.spam_removed = outcome.spam_removed;
        metrics.below_floor_removed = outcome.below_floor_removed;
        metrics.qualified = outcome.leads.len();

        self.scorer.rank(outcome.leads, plan.max_results)
    }

    /// Write the run, giving up at `deadline`.
    async fn persist(
        &self,
        session: &SearchSession,
        leads: &[QualifiedLead],
        plan: &RunPlan,
        deadline: Instant,
    ) -> Result<()> {
        let metadata = SearchMetadata {
            search_terms: plan.search_terms.clone(),
            categories: plan.categories.clone(),
            geography: plan.geography.clone(),
            searched_at: plan.started_at,
            relevance_score: 0.0,
        };
        match tokio::time::timeout_at(deadline, self.store.persist_run(session, leads, &metadata)).await {
            Ok(result) => result,
            Err(_) => Err(LeadScoutError::Persistence(format!(
                "write did not finish before the {}ms run deadline",
                self.timeout.as_millis()
            ))),
        }
    }
}

/// Terminal state for a run that stopped with `e`.
fn status_for(e: &LeadScoutError) -> RunStatus {
    match e {
        LeadScoutError::Timeout { .. } => RunStatus::TimedOut,
        LeadScoutError::Cancelled => RunStatus::Cancelled,
        _ => RunStatus::Failed,
    }
}

/// Time reserved at the end of a run for persistence: a fifth of the
/// timeout, capped at [`FINALIZE_GRACE_MAX`].
fn finalize_grace(timeout: Duration) -> Duration {
    (timeout / 5).min(FINALIZE_GRACE_MAX)
}

/// Check that a run in `from` may end as `to`.
fn checked_transition(from: RunStatus, to: RunStatus) -> Result<RunStatus> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(LeadScoutError::Internal(format!("illegal status transition {from} -> {to}")))
    }
}

/// A request resolved against the contractor profile.
struct RunPlan {
    profile: CapabilityProfile,
    geography: String,
    categories: Vec<String>,
    search_terms: Vec<String>,
    max_results: usize,
    started_at: DateTime<Utc>,
}

/// Sends every event to the caller's sink and, with a tracking id, to the
/// polling record. A slow sink loses events rather than stretching the run
/// past its ceiling.
struct Reporter<'a> {
    progress: &'a dyn ProgressSink,
    tracker: &'a StoreProgress,
    session_id: SessionId,
    tracking_id: Option<String>,
    started_at: DateTime<Utc>,
    ceiling: Instant,
}

impl Reporter<'_> {
    async fn emit(&self, status: RunStatus, stage: &str, percent: u8) {
        let event = ProgressEvent {
            session_id: self.session_id,
            tracking_id: self.tracking_id.clone(),
            agent_type: AgentType::LeadDiscovery,
            status,
            stage: stage.to_string(),
            percent: percent.min(100),
            started_at: self.started_at,
            at: Utc::now(),
        };
        let send = async {
            self.progress.emit(&event).await;
            if self.tracking_id.is_some() {
                self.tracker.emit(&event).await;
            }
        };
        let limit = self.ceiling.min(Instant::now() + EMIT_TIMEOUT);
        if tokio::time::timeout_at(limit, send).await.is_err() {
            debug!(stage, percent, "progress write timed out; event dropped");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as TimeDelta;
    use leadscout_shared::{ExecutionSession, GovernorConfig, SubscriptionTier};

    use crate::progress::ChannelProgress;

    // -----------------------------------------------------------------------
    // Fakes
    // -----------------------------------------------------------------------

    pub(crate) struct FakeAdapter {
        pub id: &'static str,
        pub listings: Vec<CandidateListing>,
        pub fail: bool,
        pub delay: Option<Duration>,
    }

    impl FakeAdapter {
        pub(crate) fn returning(id: &'static str, listings: Vec<CandidateListing>) -> Arc<dyn SourceAdapter> {
            Arc::new(Self { id, listings, fail: false, delay: None })
        }

        pub(crate) fn failing(id: &'static str) -> Arc<dyn SourceAdapter> {
            Arc::new(Self { id, listings: Vec::new(), fail: true, delay: None })
        }

        pub(crate) fn slow(id: &'static str, delay: Duration) -> Arc<dyn SourceAdapter> {
            Arc::new(Self { id, listings: Vec::new(), fail: false, delay: Some(delay) })
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn id(&self) -> &str {
            self.id
        }

        async fn search_leads(
            &self,
            session: &AutomationSession,
            _geography: &str,
            _profile: &CapabilityProfile,
            max_results: usize,
        ) -> Result<Vec<CandidateListing>> {
            assert!(session.is_ready());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(LeadScoutError::source_unavailable(self.id, "HTTP 503"));
            }
            Ok(self.listings.iter().take(max_results).cloned().collect())
        }
    }

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub runs: Mutex<Vec<(SearchSession, Vec<QualifiedLead>)>>,
        pub progress: Mutex<Vec<ExecutionSession>>,
        pub fail_runs: bool,
    }

    #[async_trait]
    impl LeadStore for MemoryStore {
        async fn persist_run(
            &self,
            session: &SearchSession,
            leads: &[QualifiedLead],
            _metadata: &SearchMetadata,
        ) -> Result<()> {
            if self.fail_runs {
                return Err(LeadScoutError::Persistence("disk full".into()));
            }
            self.runs.lock().unwrap().push((session.clone(), leads.to_vec()));
            Ok(())
        }

        async fn upsert_execution_session(&self, record: &ExecutionSession) -> Result<()> {
            self.progress.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    /// A store whose run writes never come back in time.
    struct StalledStore;

    #[async_trait]
    impl LeadStore for StalledStore {
        async fn persist_run(
            &self,
            _session: &SearchSession,
            _leads: &[QualifiedLead],
            _metadata: &SearchMetadata,
        ) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        async fn upsert_execution_session(&self, _record: &ExecutionSession) -> Result<()> {
            Ok(())
        }
    }

    /// An engine that is never asked to load anything.
    pub(crate) struct IdleLoader;

    #[async_trait]
    impl PageLoader for IdleLoader {
        async fn load(&self, url: &url::Url) -> Result<String> {
            Err(LeadScoutError::Network(format!("unexpected load of {url}")))
        }

        fn name(&self) -> &str {
            "idle"
        }
    }

    pub(crate) fn listing(url: &str, title: &str, value: f64, hours_old: i64) -> CandidateListing {
        CandidateListing {
            source_id: "fake".into(),
            url: url.into(),
            title: title.into(),
            description: format!("{title}. Homeowner needs this done, call to discuss."),
            compensation_text: format!("${value}"),
            stated_value: Some(value),
            posted_text: format!("{hours_old} hours ago"),
            posted_at: Some(Utc::now() - TimeDelta::hours(hours_old)),
            contact_text: Some("reply through listing".into()),
            location: Some("Dallas".into()),
            category_hint: Some("roofing".into()),
            matched_terms: vec!["roof repair".into()],
        }
    }

    pub(crate) fn request(account: &str) -> RunRequest {
        RunRequest {
            account_id: account.into(),
            profile: CapabilityProfile {
                contractor_id: "c-1".into(),
                contractor_name: "Lone Star Roofing".into(),
                services: vec![ServiceOffering { category: "roofing".into(), primary: true }],
                service_area: "Dallas, TX".into(),
                tier: SubscriptionTier::Scale,
                min_project_value: 0.0,
            },
            search: SearchRequest {
                geography: "Dallas, TX".into(),
                categories: vec!["roofing".into()],
                max_results: 10,
                session_tracking_id: None,
            },
        }
    }

    pub(crate) fn orchestrator(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<MemoryStore>,
    ) -> Orchestrator {
        let config = AppConfig::default();
        let governor = Arc::new(Governor::new(GovernorConfig::default()));
        Orchestrator::new(&config, governor, store)
            .expect("orchestrator")
            .with_adapters(adapters)
            .with_loader(Arc::new(IdleLoader))
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn completed_run_ranks_persists_and_charges() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(
            vec![
                FakeAdapter::returning(
                    "a",
                    vec![
                        listing("https://a.test/1.html", "Roof repair needed", 4_000.0, 30),
                        listing("https://a.test/2.html", "Urgent roof leak, shingles missing", 6_000.0, 1),
                    ],
                ),
                FakeAdapter::returning(
                    "b",
                    vec![
                        listing("https://a.test/1.html", "Roof repair needed", 4_000.0, 30),
                        listing("https://b.test/3.html", "Roof patch", 200.0, 2),
                    ],
                ),
            ],
            store.clone(),
        );

        let report = orch
            .run(request("acct-1"), &crate::SilentProgress, CancellationToken::new())
            .await
            .expect("admitted");

        assert_eq!(report.status(), RunStatus::Completed);
        assert!(report.error.is_none());
        assert_eq!(report.metrics.candidates_found, 4);
        assert_eq!(report.metrics.duplicates_removed, 1);
        assert_eq!(report.metrics.below_floor_removed, 1);
        assert_eq!(report.leads.len(), 2);
        assert_eq!(report.leads[0].url, "https://a.test/2.html");
        assert!(report.leads[0].relevance_score >= report.leads[1].relevance_score);
        assert_eq!(report.quota.monthly_used, 1);
        assert_eq!(report.quota.running, 0);

        let runs = store.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0.status, RunStatus::Completed);
        assert_eq!(runs[0].1.len(), 2);
    }

    #[tokio::test]
    async fn failing_source_is_skipped() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(
            vec![
                FakeAdapter::failing("down"),
                FakeAdapter::returning("up", vec![listing("https://up.test/1.html", "Roof repair", 5_000.0, 3)]),
            ],
            store,
        );

        let report = orch
            .run(request("acct-1"), &crate::SilentProgress, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status(), RunStatus::Completed);
        assert_eq!(report.leads.len(), 1);
        assert_eq!(report.source_errors.len(), 1);
        assert_eq!(report.source_errors[0].source_id, "down");
        assert_eq!(report.source_errors[0].error.kind, "source_unavailable");
    }

    #[tokio::test]
    async fn all_sources_failing_fails_the_run() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(vec![FakeAdapter::failing("x"), FakeAdapter::failing("y")], store);

        let report = orch
            .run(request("acct-1"), &crate::SilentProgress, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.error.as_ref().unwrap().kind, "source_unavailable");
        assert_eq!(report.quota.monthly_used, 1);
    }

    #[tokio::test]
    async fn persistence_failure_still_returns_leads() {
        let store = Arc::new(MemoryStore { fail_runs: true, ..Default::default() });
        let orch = orchestrator(
            vec![FakeAdapter::returning("a", vec![listing("https://a.test/1.html", "Roof repair", 5_000.0, 3)])],
            store,
        );

        let report = orch
            .run(request("acct-1"), &crate::SilentProgress, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.error.as_ref().unwrap().kind, "persistence_error");
        assert_eq!(report.leads.len(), 1);
    }

    #[tokio::test]
    async fn timeout_returns_partial_results() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(
            vec![
                FakeAdapter::returning("fast", vec![listing("https://a.test/1.html", "Roof repair", 5_000.0, 3)]),
                FakeAdapter::slow("stuck", Duration::from_secs(60)),
            ],
            store.clone(),
        )
        .with_timeout(Duration::from_millis(200));

        let report = tokio::time::timeout(
            Duration::from_secs(10),
            orch.run(request("acct-1"), &crate::SilentProgress, CancellationToken::new()),
        )
        .await
        .expect("run must not hang")
        .unwrap();

        assert_eq!(report.status(), RunStatus::TimedOut);
        assert_eq!(report.error.as_ref().unwrap().kind, "timeout_error");
        assert_eq!(report.leads.len(), 1);
        assert_eq!(store.runs.lock().unwrap()[0].0.status, RunStatus::TimedOut);
    }

    #[tokio::test]
    async fn cancelled_before_first_source() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(
            vec![FakeAdapter::returning("a", vec![listing("https://a.test/1.html", "Roof repair", 5_000.0, 3)])],
            store.clone(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orch.run(request("acct-1"), &crate::SilentProgress, cancel).await.unwrap();

        assert_eq!(report.status(), RunStatus::Cancelled);
        assert!(report.leads.is_empty());
        assert_eq!(store.runs.lock().unwrap()[0].0.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn governor_rejection_starts_nothing() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(vec![FakeAdapter::returning("a", Vec::new())], store.clone());
        let _other = orch
            .governor()
            .start_session("acct-1", SubscriptionTier::Scale, AgentType::CostAnalysis)
            .unwrap();

        let err = orch
            .run(request("acct-1"), &crate::SilentProgress, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LeadScoutError::AgentConflict { .. }));
        assert!(store.runs.lock().unwrap().is_empty());
        let summary = orch
            .governor()
            .summary("acct-1", SubscriptionTier::Scale, AgentType::LeadDiscovery);
        assert_eq!(summary.monthly_used, 0);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_admission() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(vec![FakeAdapter::returning("a", Vec::new())], store);
        let mut req = request("acct-1");
        req.search.max_results = 0;

        let err = orch
            .run(req, &crate::SilentProgress, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_tracked() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(
            vec![
                FakeAdapter::returning("a", vec![listing("https://a.test/1.html", "Roof repair", 5_000.0, 3)]),
                FakeAdapter::returning("b", Vec::new()),
            ],
            store.clone(),
        );
        let (sink, mut rx) = ChannelProgress::new(32);
        let mut req = request("acct-1");
        req.search.session_tracking_id = Some("track-9".into());

        orch.run(req, &sink, CancellationToken::new()).await.unwrap();
        drop(sink);

        let mut percents = Vec::new();
        while let Some(event) = rx.recv().await {
            percents.push(event.percent);
        }
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));

        let tracked = store.progress.lock().unwrap();
        assert_eq!(tracked.len(), percents.len());
        let last = tracked.last().unwrap();
        assert_eq!(last.id, "track-9");
        assert_eq!(last.status, RunStatus::Completed);
        assert_eq!(last.percent, 100);
    }

    #[tokio::test]
    async fn truncates_to_max_results() {
        let store = Arc::new(MemoryStore::default());
        let listings = (0..15)
            .map(|i| listing(&format!("https://a.test/{i}.html"), "Roof repair", 2_000.0 + i as f64 * 100.0, i))
            .collect();
        let orch = orchestrator(vec![FakeAdapter::returning("a", listings)], store);
        let mut req = request("acct-1");
        req.search.max_results = 5;

        let report = orch
            .run(req, &crate::SilentProgress, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.leads.len(), 5);
        assert_eq!(report.metrics.qualified, 5);
        assert!(
            report
                .leads
                .windows(2)
                .all(|w| w[0].relevance_score >= w[1].relevance_score)
        );
    }

    #[tokio::test]
    async fn stalled_store_cannot_stretch_the_run_past_its_timeout() {
        let timeout = Duration::from_millis(300);
        let orch = Orchestrator::new(
            &AppConfig::default(),
            Arc::new(Governor::new(GovernorConfig::default())),
            Arc::new(StalledStore),
        )
        .unwrap()
        .with_adapters(vec![FakeAdapter::returning(
            "a",
            vec![listing("https://a.test/1.html", "Roof repair", 5_000.0, 3)],
        )])
        .with_loader(Arc::new(IdleLoader))
        .with_timeout(timeout);

        let started = Instant::now();
        let report = orch
            .run(request("acct-1"), &crate::SilentProgress, CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed <= timeout, "run took {elapsed:?}");
        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.error.as_ref().unwrap().kind, "persistence_error");
        assert_eq!(report.leads.len(), 1);
        assert_eq!(report.quota.running, 0);
    }

    #[tokio::test]
    async fn undrained_progress_channel_does_not_stall_the_run() {
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(
            vec![
                FakeAdapter::returning("a", vec![listing("https://a.test/1.html", "Roof repair", 5_000.0, 3)]),
                FakeAdapter::returning("b", Vec::new()),
                FakeAdapter::returning("c", Vec::new()),
            ],
            store.clone(),
        );
        let (sink, _rx) = ChannelProgress::new(1);

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            orch.run(request("acct-1"), &sink, CancellationToken::new()),
        )
        .await
        .expect("run must not wait on the progress receiver")
        .unwrap();

        assert_eq!(report.status(), RunStatus::Completed);
        assert_eq!(store.runs.lock().unwrap().len(), 1);
    }

    #[test]
    fn terminal_states_cannot_be_left() {
        assert_eq!(
            checked_transition(RunStatus::Running, RunStatus::TimedOut).unwrap(),
            RunStatus::TimedOut
        );
        let err = checked_transition(RunStatus::Completed, RunStatus::Failed).unwrap_err();
        assert_eq!(err.kind(), "internal_error");
        assert!(checked_transition(RunStatus::Running, RunStatus::Running).is_err());
    }

    #[test]
    fn grace_is_a_slice_of_the_timeout() {
        assert_eq!(finalize_grace(Duration::from_millis(500)), Duration::from_millis(100));
        assert_eq!(finalize_grace(Duration::from_secs(600)), FINALIZE_GRACE_MAX);
    }
}
