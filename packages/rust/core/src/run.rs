//! Background runs: one spawned task per run, cancellable between sources.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use leadscout_shared::{LeadScoutError, Result};

use crate::pipeline::{Orchestrator, RunReport, RunRequest};
use crate::progress::ProgressSink;

/// Handle to a run executing on the tokio runtime.
pub struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    /// Ask the run to stop. It finishes the source in flight, then
    /// terminates as `cancelled` with whatever was collected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run's result.
    pub async fn join(self) -> Result<RunReport> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(LeadScoutError::Internal("run task panicked".into())),
            Err(e) => Err(LeadScoutError::Internal(format!("run task aborted: {e}"))),
        }
    }
}

/// Start `req` as an independent task.
pub fn spawn_run(
    orchestrator: Arc<Orchestrator>,
    req: RunRequest,
    progress: Arc<dyn ProgressSink>,
) -> RunHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let span = info_span!("background_run", account_id = %req.account_id);

    let task = tokio::spawn(
        async move { orchestrator.run(req, progress.as_ref(), token).await }.instrument(span),
    );

    RunHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use leadscout_shared::RunStatus;

    use crate::SilentProgress;
    use crate::pipeline::tests::{FakeAdapter, MemoryStore, listing, orchestrator, request};

    #[tokio::test]
    async fn runs_for_different_accounts_proceed_in_parallel() {
        let store = Arc::new(MemoryStore::default());
        let orch = Arc::new(orchestrator(
            vec![FakeAdapter::returning(
                "a",
                vec![listing("https://a.test/1.html", "Roof repair", 5_000.0, 2)],
            )],
            store.clone(),
        ));

        let handles: Vec<RunHandle> = (0..4)
            .map(|i| {
                spawn_run(
                    orch.clone(),
                    request(&format!("acct-{i}")),
                    Arc::new(SilentProgress),
                )
            })
            .collect();

        for handle in handles {
            let report = handle.join().await.unwrap();
            assert_eq!(report.status(), RunStatus::Completed);
            assert_eq!(report.quota.monthly_used, 1);
        }
        assert_eq!(store.runs.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn cancel_stops_between_sources() {
        let store = Arc::new(MemoryStore::default());
        let orch = Arc::new(orchestrator(
            vec![
                FakeAdapter::slow("slow", Duration::from_millis(300)),
                FakeAdapter::returning(
                    "never",
                    vec![listing("https://a.test/1.html", "Roof repair", 5_000.0, 2)],
                ),
            ],
            store,
        ));

        let handle = spawn_run(orch, request("acct-1"), Arc::new(SilentProgress));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let report = handle.join().await.unwrap();
        assert_eq!(report.status(), RunStatus::Cancelled);
        assert_eq!(report.error.as_ref().unwrap().kind, "cancelled");
        assert!(report.leads.is_empty());
    }
}
