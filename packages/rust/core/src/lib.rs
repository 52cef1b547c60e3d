//! Pipeline orchestration for LeadScout.
//!
//! This crate ties the governor, the listing sources, scoring, and storage
//! into one governed run ([`Orchestrator::run`]), and exposes it as a
//! background task ([`spawn_run`]) with progress reporting. Quota usage from
//! earlier processes is restored with [`restore_usage`].

pub mod pipeline;
pub mod progress;
pub mod run;
pub mod usage;

pub use pipeline::{
    ErrorPayload, Orchestrator, QualityMetrics, RunReport, RunRequest, SourceFailure,
};
pub use progress::{ChannelProgress, ProgressEvent, ProgressSink, SilentProgress, StoreProgress};
pub use run::{RunHandle, spawn_run};
pub use usage::restore_usage;
