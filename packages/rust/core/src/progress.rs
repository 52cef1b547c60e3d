//! Progress events and the sinks that receive them.
//!
//! The orchestrator only appends events; what a sink does with them (forward
//! to a channel, write a polling record, nothing) is up to the sink. A sink
//! never fails a run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use leadscout_shared::{AgentType, ExecutionSession, RunStatus, SessionId};
use leadscout_storage::LeadStore;

/// One stage/percent update.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
    pub agent_type: AgentType,
    pub status: RunStatus,
    pub stage: String,
    pub percent: u8,
    pub started_at: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: &ProgressEvent);
}

/// No-op sink for headless and test usage.
pub struct SilentProgress;

#[async_trait]
impl ProgressSink for SilentProgress {
    async fn emit(&self, _event: &ProgressEvent) {}
}

/// Forwards events into a bounded channel.
///
/// Never waits on the receiver: when the channel is full the event is
/// dropped, and a dropped receiver is ignored.
#[derive(Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgress {
    async fn emit(&self, event: &ProgressEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(stage = %event.stage, percent = event.percent, "progress channel full; event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(stage = %event.stage, "progress receiver dropped");
            }
        }
    }
}

/// Writes the `execution_sessions` record keyed by the caller's tracking id.
pub struct StoreProgress {
    store: Arc<dyn LeadStore>,
}

impl StoreProgress {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProgressSink for StoreProgress {
    async fn emit(&self, event: &ProgressEvent) {
        let Some(tracking_id) = &event.tracking_id else {
            return;
        };
        let record = ExecutionSession {
            id: tracking_id.clone(),
            agent_type: event.agent_type,
            status: event.status,
            percent: event.percent,
            stage: event.stage.clone(),
            started_at: event.started_at,
            updated_at: event.at,
        };
        if let Err(e) = self.store.upsert_execution_session(&record).await {
            warn!(tracking_id = %tracking_id, error = %e, "progress record write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(percent: u8) -> ProgressEvent {
        ProgressEvent {
            session_id: SessionId::new(),
            tracking_id: None,
            agent_type: AgentType::LeadDiscovery,
            status: RunStatus::Running,
            stage: "classifieds".into(),
            percent,
            started_at: Utc::now(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn channel_forwards_in_order() {
        let (sink, mut rx) = ChannelProgress::new(4);
        sink.emit(&event(10)).await;
        sink.emit(&event(50)).await;
        assert_eq!(rx.recv().await.unwrap().percent, 10);
        assert_eq!(rx.recv().await.unwrap().percent, 50);
    }

    #[tokio::test]
    async fn dropped_receiver_is_harmless() {
        let (sink, rx) = ChannelProgress::new(1);
        drop(rx);
        sink.emit(&event(100)).await;
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = ChannelProgress::new(1);
        sink.emit(&event(10)).await;
        let second = tokio::time::timeout(std::time::Duration::from_secs(1), sink.emit(&event(20))).await;
        assert!(second.is_ok(), "emit waited on a full channel");

        assert_eq!(rx.recv().await.unwrap().percent, 10);
        assert!(rx.try_recv().is_err());
    }
}
