//! Session/usage governor.
//!
//! Enforces, per account: a monthly session quota by subscription tier, a
//! daily quota per agent type, mutual exclusion between conflicting agent
//! types, and a cap on concurrently running sessions.
//!
//! Each account has its own lock; accounts never contend with each other.
//! All checks for one start run under that lock, and a rejected start
//! changes nothing. An admitted start returns a [`SessionPermit`] which
//! charges the quota exactly once when the session finishes.

mod clock;
mod ledger;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Datelike, Utc};
use leadscout_shared::{AgentType, GovernorConfig, Result, RunStatus, SubscriptionTier};
use serde::Serialize;
use tracing::{debug, info, warn};

pub use clock::{Clock, ManualClock, SystemClock};
use ledger::AccountLedger;

type SharedLedger = Arc<Mutex<AccountLedger>>;

fn lock(ledger: &Mutex<AccountLedger>) -> MutexGuard<'_, AccountLedger> {
    ledger.lock().unwrap_or_else(|e| e.into_inner())
}

/// Usage snapshot returned with every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSummary {
    pub account_id: String,
    pub tier: SubscriptionTier,
    pub monthly_used: u32,
    pub monthly_limit: u32,
    pub monthly_remaining: u32,
    pub agent_type: AgentType,
    pub daily_used: u32,
    /// `None` when the agent type has no daily limit.
    pub daily_limit: Option<u32>,
    pub running: u32,
}

pub struct Governor {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    accounts: Mutex<HashMap<String, SharedLedger>>,
    next_permit: AtomicU64,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            accounts: Mutex::new(HashMap::new()),
            next_permit: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    fn ledger(&self, account_id: &str) -> SharedLedger {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.entry(account_id.to_string()).or_default().clone()
    }

    /// Run every admission check without starting anything.
    pub fn can_start_session(
        &self,
        account_id: &str,
        tier: SubscriptionTier,
        agent: AgentType,
    ) -> Result<()> {
        let ledger = self.ledger(account_id);
        let mut guard = lock(&ledger);
        guard.roll(self.clock.local_now());
        guard.check(&self.config, self.config.tier_limits.for_tier(tier), agent)
    }

    /// Check and admit in one step. The returned permit holds a running slot.
    #[tracing::instrument(skip_all, fields(account_id = %account_id, tier = %tier, agent = %agent))]
    pub fn start_session(
        &self,
        account_id: &str,
        tier: SubscriptionTier,
        agent: AgentType,
    ) -> Result<SessionPermit> {
        let ledger = self.ledger(account_id);
        let monthly_limit = self.config.tier_limits.for_tier(tier);
        let permit_id = {
            let mut guard = lock(&ledger);
            guard.roll(self.clock.local_now());
            if let Err(e) = guard.check(&self.config, monthly_limit, agent) {
                warn!(error = %e, kind = e.kind(), "session rejected");
                return Err(e);
            }
            let id = self.next_permit.fetch_add(1, Ordering::Relaxed);
            guard.admit(id, agent);
            id
        };

        info!(permit_id, "session admitted");
        Ok(SessionPermit {
            id: permit_id,
            account_id: account_id.to_string(),
            tier,
            agent,
            monthly_limit,
            daily_limit: self.config.daily_limit(agent),
            ledger,
            clock: self.clock.clone(),
            finished: false,
        })
    }

    /// Count sessions charged by earlier processes toward this account's
    /// quotas. `history` holds the agent type and start time of each stored
    /// session; entries outside the current month are ignored.
    pub fn seed_usage<I>(&self, account_id: &str, history: I)
    where
        I: IntoIterator<Item = (AgentType, DateTime<Utc>)>,
    {
        let ledger = self.ledger(account_id);
        let mut guard = lock(&ledger);
        let now = self.clock.local_now();
        guard.roll(now);

        let mut monthly = 0u32;
        let mut daily: HashMap<AgentType, u32> = HashMap::new();
        for (agent, started_at) in history {
            let started = self.clock.to_local(started_at);
            if (started.year(), started.month()) != (now.year(), now.month()) {
                continue;
            }
            monthly += 1;
            if started.date() == now.date() {
                *daily.entry(agent).or_insert(0) += 1;
            }
        }
        guard.seed(monthly, &daily);
        debug!(account_id, monthly, "usage seeded from history");
    }

    /// Current usage for an account and agent type.
    pub fn summary(&self, account_id: &str, tier: SubscriptionTier, agent: AgentType) -> QuotaSummary {
        let ledger = self.ledger(account_id);
        let mut guard = lock(&ledger);
        guard.roll(self.clock.local_now());
        build_summary(
            &guard,
            account_id,
            tier,
            agent,
            self.config.tier_limits.for_tier(tier),
            self.config.daily_limit(agent),
        )
    }
}

fn build_summary(
    ledger: &AccountLedger,
    account_id: &str,
    tier: SubscriptionTier,
    agent: AgentType,
    monthly_limit: u32,
    daily_limit: Option<u32>,
) -> QuotaSummary {
    QuotaSummary {
        account_id: account_id.to_string(),
        tier,
        monthly_used: ledger.monthly_used(),
        monthly_limit,
        monthly_remaining: monthly_limit.saturating_sub(ledger.monthly_used()),
        agent_type: agent,
        daily_used: ledger.daily_used(agent),
        daily_limit,
        running: ledger.running_count(),
    }
}

// ---------------------------------------------------------------------------
// SessionPermit
// ---------------------------------------------------------------------------

/// A running slot. Finishing it, or dropping it unfinished, releases the slot
/// and charges one session.
pub struct SessionPermit {
    id: u64,
    account_id: String,
    tier: SubscriptionTier,
    agent: AgentType,
    monthly_limit: u32,
    daily_limit: Option<u32>,
    ledger: SharedLedger,
    clock: Arc<dyn Clock>,
    finished: bool,
}

impl SessionPermit {
    pub fn agent(&self) -> AgentType {
        self.agent
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Release the slot and charge the session for its terminal `status`.
    pub fn finish(mut self, status: RunStatus) -> QuotaSummary {
        let summary = self.release(status);
        self.finished = true;
        summary
    }

    fn release(&self, status: RunStatus) -> QuotaSummary {
        let mut guard = lock(&self.ledger);
        guard.roll(self.clock.local_now());
        if guard.release_and_charge(self.id) {
            debug!(permit_id = self.id, status = %status, "session charged");
        }
        build_summary(
            &guard,
            &self.account_id,
            self.tier,
            self.agent,
            self.monthly_limit,
            self.daily_limit,
        )
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        if !self.finished {
            warn!(permit_id = self.id, "session permit dropped unfinished");
            self.release(RunStatus::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta, TimeZone};
    use leadscout_shared::LeadScoutError;

    fn start_clock() -> Arc<ManualClock> {
        let start = NaiveDate::from_ymd_opt(2024, 5, 31)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        Arc::new(ManualClock::new(start))
    }

    fn governor(config: GovernorConfig) -> (Governor, Arc<ManualClock>) {
        let clock = start_clock();
        (Governor::with_clock(config, clock.clone()), clock)
    }

    fn unlimited_daily() -> GovernorConfig {
        GovernorConfig {
            daily_limits: Default::default(),
            concurrency_cap: 10,
            ..GovernorConfig::default()
        }
    }

    #[test]
    fn monthly_quota_rejection_changes_nothing() {
        let (gov, _) = governor(unlimited_daily());
        for _ in 0..2 {
            gov.start_session("acct", SubscriptionTier::Starter, AgentType::LeadDiscovery)
                .unwrap()
                .finish(RunStatus::Completed);
        }
        let before = gov.summary("acct", SubscriptionTier::Starter, AgentType::LeadDiscovery);
        assert_eq!(before.monthly_used, 2);
        assert_eq!(before.monthly_remaining, 0);

        let err = gov
            .start_session("acct", SubscriptionTier::Starter, AgentType::LeadDiscovery)
            .err()
            .unwrap();
        assert!(matches!(err, LeadScoutError::SessionQuotaExceeded { used: 2, limit: 2 }));

        let after = gov.summary("acct", SubscriptionTier::Starter, AgentType::LeadDiscovery);
        assert_eq!(before, after);
    }

    #[test]
    fn failed_runs_are_charged_once() {
        let (gov, _) = governor(unlimited_daily());
        let permit = gov
            .start_session("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery)
            .unwrap();
        let summary = permit.finish(RunStatus::Failed);
        assert_eq!(summary.monthly_used, 1);
        assert_eq!(summary.running, 0);

        // dropped without finishing still charges, exactly once
        drop(gov.start_session("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery).unwrap());
        let s = gov.summary("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery);
        assert_eq!(s.monthly_used, 2);
        assert_eq!(s.daily_used, 2);
    }

    #[test]
    fn running_sessions_count_toward_quota() {
        let (gov, _) = governor(unlimited_daily());
        let _a = gov
            .start_session("acct", SubscriptionTier::Starter, AgentType::MarketResearch)
            .unwrap();
        let _b = gov
            .start_session("acct", SubscriptionTier::Starter, AgentType::BidWriter)
            .unwrap();
        let err = gov
            .start_session("acct", SubscriptionTier::Starter, AgentType::BidWriter)
            .err()
            .unwrap();
        assert_eq!(err.kind(), "session_quota_exceeded");
    }

    #[test]
    fn conflicting_agent_is_rejected() {
        let (gov, _) = governor(GovernorConfig::default());
        let running = gov
            .start_session("acct", SubscriptionTier::Scale, AgentType::CostAnalysis)
            .unwrap();
        let err = gov
            .start_session("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery)
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "agent conflict: lead_discovery cannot start while cost_analysis is running"
        );
        assert_eq!(
            gov.summary("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery).running,
            1
        );

        // other accounts are unaffected
        assert!(
            gov.can_start_session("other", SubscriptionTier::Scale, AgentType::LeadDiscovery)
                .is_ok()
        );

        running.finish(RunStatus::Completed);
        assert!(
            gov.can_start_session("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery)
                .is_ok()
        );
    }

    #[test]
    fn concurrency_cap_applies_across_types() {
        let (gov, _) = governor(GovernorConfig::default());
        let _a = gov
            .start_session("acct", SubscriptionTier::Enterprise, AgentType::MarketResearch)
            .unwrap();
        let _b = gov
            .start_session("acct", SubscriptionTier::Enterprise, AgentType::BidWriter)
            .unwrap();
        let err = gov
            .start_session("acct", SubscriptionTier::Enterprise, AgentType::LeadDiscovery)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LeadScoutError::ConcurrencyCapReached { running: 2, cap: 2 }
        ));
    }

    #[test]
    fn daily_quota_resets_at_local_midnight() {
        let (gov, clock) = governor(GovernorConfig::default());
        for _ in 0..3 {
            gov.start_session("acct", SubscriptionTier::Enterprise, AgentType::LeadDiscovery)
                .unwrap()
                .finish(RunStatus::Completed);
        }
        let err = gov
            .can_start_session("acct", SubscriptionTier::Enterprise, AgentType::LeadDiscovery)
            .unwrap_err();
        assert_eq!(err.kind(), "daily_quota_exceeded");
        // a different agent type has its own counter
        assert!(
            gov.can_start_session("acct", SubscriptionTier::Enterprise, AgentType::BidWriter)
                .is_ok()
        );

        // 22:00 on May 31 + 3h crosses both the day and the month boundary
        clock.advance(TimeDelta::hours(3));
        let s = gov.summary("acct", SubscriptionTier::Enterprise, AgentType::LeadDiscovery);
        assert_eq!(s.daily_used, 0);
        assert_eq!(s.monthly_used, 0);
        assert!(
            gov.can_start_session("acct", SubscriptionTier::Enterprise, AgentType::LeadDiscovery)
                .is_ok()
        );
    }

    #[test]
    fn concurrent_starts_never_overshoot() {
        let (gov, _) = governor(GovernorConfig {
            concurrency_cap: 64,
            daily_limits: Default::default(),
            ..GovernorConfig::default()
        });
        let gov = Arc::new(gov);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let gov = gov.clone();
                std::thread::spawn(move || {
                    gov.start_session("acct", SubscriptionTier::Scale, AgentType::BidWriter)
                        .map(|p| p.finish(RunStatus::Completed))
                        .is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 10);
        assert_eq!(
            gov.summary("acct", SubscriptionTier::Scale, AgentType::BidWriter).monthly_used,
            10
        );
    }

    #[test]
    fn stored_sessions_exhaust_the_monthly_quota() {
        let (gov, _) = governor(unlimited_daily());
        let history = [
            (AgentType::LeadDiscovery, Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap()),
            (AgentType::LeadDiscovery, Utc.with_ymd_and_hms(2024, 5, 20, 9, 0, 0).unwrap()),
        ];
        gov.seed_usage("acct", history);

        let err = gov
            .start_session("acct", SubscriptionTier::Starter, AgentType::LeadDiscovery)
            .err()
            .unwrap();
        assert!(matches!(err, LeadScoutError::SessionQuotaExceeded { used: 2, limit: 2 }));
        // other accounts are untouched
        assert!(
            gov.start_session("other", SubscriptionTier::Starter, AgentType::LeadDiscovery)
                .is_ok()
        );
    }

    #[test]
    fn seeding_counts_only_current_periods_and_is_idempotent() {
        let (gov, _) = governor(GovernorConfig::default());
        let history = vec![
            (AgentType::LeadDiscovery, Utc.with_ymd_and_hms(2024, 5, 31, 8, 0, 0).unwrap()),
            (AgentType::LeadDiscovery, Utc.with_ymd_and_hms(2024, 5, 31, 10, 0, 0).unwrap()),
            (AgentType::CostAnalysis, Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()),
            (AgentType::LeadDiscovery, Utc.with_ymd_and_hms(2024, 4, 30, 23, 0, 0).unwrap()),
        ];
        gov.seed_usage("acct", history.clone());
        gov.seed_usage("acct", history);

        let s = gov.summary("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery);
        assert_eq!(s.monthly_used, 3);
        assert_eq!(s.daily_used, 2);

        gov.start_session("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery)
            .unwrap()
            .finish(RunStatus::Completed);
        let err = gov
            .start_session("acct", SubscriptionTier::Scale, AgentType::LeadDiscovery)
            .err()
            .unwrap();
        assert!(matches!(err, LeadScoutError::DailyQuotaExceeded { used: 3, limit: 3, .. }));
    }
}
