//! Per-account usage counters and the admission checks run against them.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use leadscout_shared::{AgentType, GovernorConfig, LeadScoutError, Result};

/// Counters for one account. Always accessed under that account's lock.
#[derive(Debug, Default)]
pub(crate) struct AccountLedger {
    month: Option<(i32, u32)>,
    monthly_used: u32,
    day: Option<NaiveDate>,
    daily_used: HashMap<AgentType, u32>,
    /// Permit id → agent type of every session currently running.
    running: HashMap<u64, AgentType>,
}

impl AccountLedger {
    /// Reset counters whose period has ended.
    pub(crate) fn roll(&mut self, now: NaiveDateTime) {
        let month = (now.year(), now.month());
        if self.month != Some(month) {
            self.month = Some(month);
            self.monthly_used = 0;
        }
        let day = now.date();
        if self.day != Some(day) {
            self.day = Some(day);
            self.daily_used.clear();
        }
    }

    pub(crate) fn monthly_used(&self) -> u32 {
        self.monthly_used
    }

    pub(crate) fn daily_used(&self, agent: AgentType) -> u32 {
        self.daily_used.get(&agent).copied().unwrap_or(0)
    }

    pub(crate) fn running_count(&self) -> u32 {
        self.running.len() as u32
    }

    fn running_of(&self, agent: AgentType) -> u32 {
        self.running.values().filter(|a| **a == agent).count() as u32
    }

    /// Every admission check. Mutates nothing.
    ///
    /// In-flight sessions count toward both quotas, since they are charged
    /// when they finish.
    pub(crate) fn check(
        &self,
        config: &GovernorConfig,
        monthly_limit: u32,
        agent: AgentType,
    ) -> Result<()> {
        let committed = self.monthly_used + self.running_count();
        if committed >= monthly_limit {
            return Err(LeadScoutError::SessionQuotaExceeded {
                used: committed,
                limit: monthly_limit,
            });
        }

        if let Some(limit) = config.daily_limit(agent) {
            let committed = self.daily_used(agent) + self.running_of(agent);
            if committed >= limit {
                return Err(LeadScoutError::DailyQuotaExceeded {
                    agent_type: agent.as_str().to_string(),
                    used: committed,
                    limit,
                });
            }
        }

        if let Some(running) = self.running.values().find(|r| conflicts(config, agent, **r)) {
            return Err(LeadScoutError::AgentConflict {
                requested: agent.as_str().to_string(),
                running: running.as_str().to_string(),
            });
        }

        if self.running_count() >= config.concurrency_cap {
            return Err(LeadScoutError::ConcurrencyCapReached {
                running: self.running_count(),
                cap: config.concurrency_cap,
            });
        }

        Ok(())
    }

    /// Raise the counters to usage recorded elsewhere for the current
    /// periods. Never lowers them, so seeding twice is harmless.
    pub(crate) fn seed(&mut self, monthly_used: u32, daily_used: &HashMap<AgentType, u32>) {
        self.monthly_used = self.monthly_used.max(monthly_used);
        for (agent, used) in daily_used {
            let entry = self.daily_used.entry(*agent).or_insert(0);
            *entry = (*entry).max(*used);
        }
    }

    pub(crate) fn admit(&mut self, permit_id: u64, agent: AgentType) {
        self.running.insert(permit_id, agent);
    }

    /// Remove a running session and charge it. Returns false if it was
    /// already released.
    pub(crate) fn release_and_charge(&mut self, permit_id: u64) -> bool {
        let Some(agent) = self.running.remove(&permit_id) else {
            return false;
        };
        self.monthly_used += 1;
        *self.daily_used.entry(agent).or_insert(0) += 1;
        true
    }
}

fn conflicts(config: &GovernorConfig, a: AgentType, b: AgentType) -> bool {
    config
        .conflicts
        .iter()
        .any(|(x, y)| (*x == a && *y == b) || (*x == b && *y == a))
}
