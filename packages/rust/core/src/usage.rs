//! Quota usage carried across processes.

use chrono::{TimeDelta, Utc};
use tracing::info;

use leadscout_governor::Governor;
use leadscout_shared::Result;
use leadscout_storage::Storage;

/// Charge the sessions `storage` holds for `account_id` to `governor`, so a
/// fresh process enforces the same monthly and daily quotas as the last one.
///
/// Returns how many stored sessions were considered.
pub async fn restore_usage(governor: &Governor, storage: &Storage, account_id: &str) -> Result<usize> {
    // Month boundaries are local; 32 days back covers any month and offset.
    let since = Utc::now() - TimeDelta::days(32);
    let sessions = storage.list_search_sessions_since(account_id, since).await?;
    let count = sessions.len();
    governor.seed_usage(
        account_id,
        sessions.into_iter().map(|s| (s.agent_type, s.started_at)),
    );
    info!(account_id, sessions = count, "quota usage restored");
    Ok(count)
}
