//! Roomwarden Reconcile — keeps the registry and the platform in step.
//!
//! This crate provides:
//! - **scan**: the `Reconcile` trait and the generic `run_scan` driver
//! - **jobs**: one reconciler per resource kind (rooms, tmp channels,
//!   countdowns, recalls)
//! - **extension**: expiry extensions folded into their targets
//! - **scheduler**: periodic job tasks with per-job failure boundaries
//! - **settings**: the per-guild settings cache
//! - **trigger**: voice room creation on lobby joins

pub mod extension;
pub mod jobs;
pub mod scan;
pub mod scheduler;
pub mod settings;
pub mod trigger;
pub mod types;

pub use extension::{ExtensionApplier, ExtensionAppliers, PendingExtension};
pub use jobs::{standard_jobs, JobContext};
pub use scan::{run_scan, Reconcile, ReconcileJob, ScanCycle, ScanError, Verdict};
pub use scheduler::{ScanJob, Scheduler, SchedulerError};
pub use settings::{SettingsCache, SettingsRefreshJob};
pub use trigger::{TriggerError, TriggerHandler, TriggerOutcome};
pub use types::{JobState, JobStatus, ScanReport};
