//! Synchronization with the installation registry
//!
//! This module provides:
//! - Change detection against the last acknowledged state
//! - Create/patch decisions with own vs foreign identity resolution
//! - Two-phase commit and rollback of reported markers
//! - Retryable, cancellable tasks on a shared runtime

mod collaborators;
mod commit;
mod detector;
mod engine;
mod state;
mod task;


pub use collaborators::{
    BroadcastNotifier, DeviceSnapshotProvider, InstallationEvent, InstallationListener, Listener,
    NoopNotifier, NoopStats, Notifier, Operation, RemoteRegistryClient, StatsRecorder,
    REGISTRATION_SYNC_ERROR,
};
pub use commit::{is_own_device, ReportTarget, StagedReport};
pub use detector::{ChangeDetector, PendingDelta};
pub use engine::{decide, InstallationSynchronizer, InstallationSynchronizerBuilder, SyncAction};
pub use state::{SyncState, SyncStateView};
pub use task::{run_with_retry, RetryPolicy, RetryableTask, TaskHandle, TaskRunner};
