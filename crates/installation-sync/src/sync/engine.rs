//! Installation synchronizer
//!
//! Orchestrates one detect → decide → execute → commit cycle per call:
//! - Creates the remote installation when no identity is known yet
//! - Patches the own or a foreign installation otherwise
//! - Commits or rolls back reported markers once the exchange settles
//!
//! Every cycle holds the synchronizer's state lock from reading the pending
//! delta until the commit or rollback has been written, so overlapping calls
//! for the same device run one after another.

use super::collaborators::{
    DeviceSnapshotProvider, InstallationEvent, Listener, NoopNotifier, Notifier, Operation,
    RemoteRegistryClient, StatsRecorder, REGISTRATION_SYNC_ERROR,
};
use super::commit::{is_own_device, ReportTarget, StagedReport};
use super::detector::{ChangeDetector, PendingDelta};
use super::state::SyncState;
use super::task::{RetryPolicy, RetryableTask, TaskHandle, TaskRunner};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{CustomAttributes, Installation};
use crate::observability::SyncMetrics;
use crate::store::LocalStateStore;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type CycleGuard = OwnedMutexGuard<()>;

/// What a sync cycle will do with the pending delta
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// No identity yet and an unreported token: create the installation
    Create(PendingDelta),
    /// Identity known: patch it with the pending delta
    Patch(PendingDelta),
    /// Nothing to send, or no identity and no token to create one with
    Idle,
}

/// Decide between create and patch for a sync cycle
pub fn decide(push_registration_id: Option<&str>, pending: Option<PendingDelta>) -> SyncAction {
    let Some(pending) = pending else {
        return SyncAction::Idle;
    };

    match push_registration_id {
        None if pending.carries_push_token() => SyncAction::Create(pending),
        // Identity must originate from a token-bearing create
        None => SyncAction::Idle,
        Some(_) => SyncAction::Patch(pending),
    }
}

/// Reconciles the local installation state with the remote registry
#[derive(Clone)]
pub struct InstallationSynchronizer {
    inner: Arc<Inner>,
}

struct Inner {
    state: SyncState,
    detector: ChangeDetector,
    registry: Arc<dyn RemoteRegistryClient>,
    device: Arc<dyn DeviceSnapshotProvider>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<dyn StatsRecorder>,
    policy: RetryPolicy,
    runner: TaskRunner,
    cycle_lock: Arc<Mutex<()>>,
}

impl InstallationSynchronizer {
    pub fn builder() -> InstallationSynchronizerBuilder {
        InstallationSynchronizerBuilder::new()
    }

    /// Persisted synchronization state
    pub fn state(&self) -> &SyncState {
        &self.inner.state
    }

    /// Run one full detect → decide → execute → commit cycle
    pub fn sync(&self, listener: Listener) -> TaskHandle {
        self.spawn(move |inner, guard, cancel| async move {
            inner.run_sync(guard, cancel, listener).await
        })
    }

    /// Store and report a new application user id
    pub fn update_application_user_id(
        &self,
        application_user_id: impl Into<String>,
        listener: Listener,
    ) -> TaskHandle {
        let application_user_id = application_user_id.into();
        self.spawn(move |inner, guard, cancel| async move {
            inner.state.set_application_user_id(&application_user_id);
            let delta = Installation {
                application_user_id: Some(application_user_id),
                ..Default::default()
            };
            inner.patch(guard, delta, None, cancel, listener).await
        })
    }

    /// Merge `attributes` into the pending set and report the whole pending set
    pub fn update_custom_attributes(
        &self,
        attributes: CustomAttributes,
        listener: Listener,
    ) -> TaskHandle {
        self.spawn(move |inner, guard, cancel| async move {
            let pending = inner.state.stage_custom_attributes(attributes);
            let delta = Installation {
                custom_attributes: Some(pending),
                ..Default::default()
            };
            inner.patch(guard, delta, None, cancel, listener).await
        })
    }

    /// Enable or disable push registration on the registry
    pub fn update_push_registration_enabled(&self, enabled: bool, listener: Listener) -> TaskHandle {
        self.spawn(move |inner, guard, cancel| async move {
            let delta = Installation {
                registration_enabled: Some(enabled),
                ..Default::default()
            };
            inner.patch(guard, delta, None, cancel, listener).await
        })
    }

    /// Change the primary flag of this device, or of another installation
    /// when `push_registration_id` names one
    pub fn update_primary_status(
        &self,
        push_registration_id: Option<String>,
        primary: bool,
        listener: Listener,
    ) -> TaskHandle {
        self.spawn(move |inner, guard, cancel| async move {
            let mut delta = push_registration_id
                .map(Installation::targeting)
                .unwrap_or_default();
            delta.primary = Some(primary);

            let local_id = inner.state.push_registration_id();
            if is_own_device(&delta, local_id.as_deref()) {
                inner.state.set_unreported_primary_setting(primary);
            }
            inner.patch(guard, delta, None, cancel, listener).await
        })
    }

    /// Pull the remote record and refresh the cached primary flag and custom attributes
    pub fn fetch_instance(&self, listener: Listener) -> TaskHandle {
        self.spawn(move |inner, guard, cancel| async move {
            inner.fetch(guard, cancel, listener).await
        })
    }

    /// Forget the device identity and all reporting progress (e.g. on logout)
    pub async fn forget_identity(&self) {
        let _guard = self.inner.cycle_lock.clone().lock_owned().await;
        self.inner.state.forget_identity();
        info!(event = "installation_forgotten", "Cleared installation identity");
    }

    fn spawn<F, Fut>(&self, cycle: F) -> TaskHandle
    where
        F: FnOnce(Arc<Inner>, CycleGuard, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = self.inner.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        self.inner.runner.spawn(cancel, async move {
            let guard = inner.cycle_lock.clone().lock_owned().await;
            cycle(inner, guard, token).await
        })
    }
}

impl Inner {
    async fn run_sync(self: Arc<Self>, guard: CycleGuard, cancel: CancellationToken, listener: Listener) {
        let device = self.device.snapshot();
        let pending = self.detector.build_pending_delta(&device, &self.state);
        let local_id = self.state.push_registration_id();

        match decide(local_id.as_deref(), pending) {
            SyncAction::Create(pending) => self.create(guard, pending, cancel, listener).await,
            SyncAction::Patch(pending) => {
                self.patch(
                    guard,
                    pending.installation,
                    pending.system_data_hash,
                    cancel,
                    listener,
                )
                .await
            }
            SyncAction::Idle => {
                debug!(
                    registered = local_id.is_some(),
                    "Installation is up to date, nothing to report"
                );
            }
        }
    }

    async fn create(
        self: Arc<Self>,
        guard: CycleGuard,
        pending: PendingDelta,
        cancel: CancellationToken,
        listener: Listener,
    ) {
        let staged = StagedReport::stage(
            &pending.installation,
            pending.system_data_hash,
            ReportTarget::OwnDevice,
        );
        let request = pending.installation;
        info!(
            event = "installation_create",
            push_service_type = ?request.push_service_type,
            "Creating installation"
        );

        let registry = self.registry.clone();
        let inner = self.clone();
        let started = Instant::now();

        RetryableTask::new(
            "create_installation",
            move || {
                let registry = registry.clone();
                let request = request.clone();
                async move {
                    let record = registry.create(&request).await?;
                    require_registration_id(record)
                }
            },
            move |outcome: Result<Installation, SyncError>| {
                inner
                    .stats
                    .record_exchange(Operation::Create, outcome.is_ok(), started.elapsed());

                match outcome {
                    Ok(record) => {
                        if let Some(id) = record.push_registration_id.as_deref() {
                            inner.state.set_push_registration_id(id);
                        }
                        staged.commit(&inner.state);
                        drop(guard);

                        info!(
                            event = "installation_created",
                            push_registration_id = ?record.push_registration_id,
                            "Installation created"
                        );
                        inner
                            .notifier
                            .notify(InstallationEvent::Created(record.clone()));
                        if let Some(listener) = listener {
                            listener.on_success(record);
                        }
                    }
                    Err(error) => inner.fail(Operation::Create, guard, &staged, error, listener),
                }
            },
        )
        .retry_with(self.policy.clone())
        .cancel_on(cancel)
        .run()
        .await
    }

    async fn patch(
        self: Arc<Self>,
        guard: CycleGuard,
        delta: Installation,
        system_data_hash: Option<i64>,
        cancel: CancellationToken,
        listener: Listener,
    ) {
        let local_id = self.state.push_registration_id();
        let own_device = is_own_device(&delta, local_id.as_deref());
        let target_id = if own_device {
            local_id
        } else {
            delta.push_registration_id.clone()
        };

        let Some(target_id) = target_id else {
            drop(guard);
            debug!("Own installation is not registered yet, update stays pending");
            if let Some(listener) = listener {
                listener.on_error(SyncError::RegistrationUnavailable);
            }
            return;
        };

        let target = if own_device {
            ReportTarget::OwnDevice
        } else {
            ReportTarget::OtherDevice
        };
        let staged = StagedReport::stage(&delta, system_data_hash, target);

        // The registration id travels as the address, not in the body
        let mut request = delta.clone();
        request.push_registration_id = None;

        info!(
            event = "installation_patch",
            push_registration_id = %target_id,
            own_device = own_device,
            "Updating installation"
        );

        let registry = self.registry.clone();
        let inner = self.clone();
        let started = Instant::now();
        let address = target_id.clone();

        RetryableTask::new(
            "patch_installation",
            move || {
                let registry = registry.clone();
                let request = request.clone();
                let address = address.clone();
                async move {
                    registry.patch(&address, &request).await?;
                    Ok::<(), SyncError>(())
                }
            },
            move |outcome: Result<(), SyncError>| {
                inner
                    .stats
                    .record_exchange(Operation::Patch, outcome.is_ok(), started.elapsed());

                match outcome {
                    Ok(()) => {
                        staged.commit(&inner.state);
                        drop(guard);

                        info!(
                            event = "installation_updated",
                            push_registration_id = %target_id,
                            own_device = own_device,
                            "Installation updated"
                        );
                        inner
                            .notifier
                            .notify(InstallationEvent::Updated(delta.clone()));
                        if let Some(listener) = listener {
                            listener.on_success(delta);
                        }
                    }
                    Err(error) => inner.fail(Operation::Patch, guard, &staged, error, listener),
                }
            },
        )
        .retry_with(self.policy.clone())
        .cancel_on(cancel)
        .run()
        .await
    }

    async fn fetch(self: Arc<Self>, guard: CycleGuard, cancel: CancellationToken, listener: Listener) {
        let Some(push_registration_id) = self.state.push_registration_id() else {
            debug!("No installation registered yet, skipping fetch");
            return;
        };

        let registry = self.registry.clone();
        let inner = self.clone();
        let started = Instant::now();

        RetryableTask::new(
            "fetch_installation",
            move || {
                let registry = registry.clone();
                let id = push_registration_id.clone();
                async move { Ok::<_, SyncError>(registry.get(&id).await?) }
            },
            move |outcome: Result<Installation, SyncError>| {
                inner
                    .stats
                    .record_exchange(Operation::Fetch, outcome.is_ok(), started.elapsed());

                match outcome {
                    Ok(record) => {
                        if let Some(primary) = record.primary {
                            inner.state.set_primary_setting(primary);
                        }
                        inner
                            .state
                            .set_custom_attributes(record.custom_attributes.clone().unwrap_or_default());
                        drop(guard);

                        debug!(event = "installation_fetched", "Fetched installation");
                        if let Some(listener) = listener {
                            listener.on_success(record);
                        }
                    }
                    Err(error) => {
                        drop(guard);
                        warn!(
                            event = "installation_fetch_failed",
                            code = error.code(),
                            error = %error,
                            "Failed to fetch installation"
                        );
                        if let Some(listener) = listener {
                            listener.on_error(error);
                        }
                    }
                }
            },
        )
        .retry_with(self.policy.clone())
        .cancel_on(cancel)
        .run()
        .await
    }

    /// Rollback, then report the failure everywhere it needs to go
    fn fail(
        &self,
        operation: Operation,
        guard: CycleGuard,
        staged: &StagedReport,
        error: SyncError,
        listener: Listener,
    ) {
        staged.rollback(&self.state, &error);
        drop(guard);

        warn!(
            event = "installation_sync_failed",
            operation = %operation,
            code = error.code(),
            error = %error,
            "Installation exchange failed, changes stay pending"
        );
        self.stats.record_error(REGISTRATION_SYNC_ERROR);
        self.notifier.notify(InstallationEvent::Error(error.clone()));
        if let Some(listener) = listener {
            listener.on_error(error);
        }
    }
}

fn require_registration_id(record: Installation) -> Result<Installation, SyncError> {
    match record.push_registration_id.as_deref() {
        Some(id) if !id.trim().is_empty() => Ok(record),
        _ => Err(SyncError::rejected(
            "MISSING_REGISTRATION_ID",
            "registry did not assign a push registration id",
        )),
    }
}

/// Builder for [`InstallationSynchronizer`]
pub struct InstallationSynchronizerBuilder {
    registry: Option<Arc<dyn RemoteRegistryClient>>,
    store: Option<Arc<dyn LocalStateStore>>,
    device: Option<Arc<dyn DeviceSnapshotProvider>>,
    notifier: Arc<dyn Notifier>,
    stats: Option<Arc<dyn StatsRecorder>>,
    policy: RetryPolicy,
    runner: Option<TaskRunner>,
    report_system_info: bool,
}

impl InstallationSynchronizerBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            store: None,
            device: None,
            notifier: Arc::new(NoopNotifier),
            stats: None,
            policy: RetryPolicy::default(),
            runner: None,
            report_system_info: true,
        }
    }

    /// Apply retry and privacy settings from configuration
    pub fn config(mut self, config: &SyncConfig) -> Self {
        self.policy = config.retry_policy();
        self.report_system_info = config.report_system_info;
        self
    }

    pub fn registry(mut self, registry: Arc<dyn RemoteRegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(mut self, store: Arc<dyn LocalStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn device(mut self, device: Arc<dyn DeviceSnapshotProvider>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn stats(mut self, stats: Arc<dyn StatsRecorder>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn runner(mut self, runner: TaskRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn report_system_info(mut self, enabled: bool) -> Self {
        self.report_system_info = enabled;
        self
    }

    pub fn build(self) -> Result<InstallationSynchronizer> {
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry client is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("state store is required"))?;
        let device = self
            .device
            .ok_or_else(|| anyhow::anyhow!("device snapshot provider is required"))?;
        let runner = match self.runner {
            Some(runner) => runner,
            None => TaskRunner::try_current()
                .ok_or_else(|| anyhow::anyhow!("no task runner given and no tokio runtime running"))?,
        };
        let stats = self
            .stats
            .unwrap_or_else(|| Arc::new(SyncMetrics::new()));

        Ok(InstallationSynchronizer {
            inner: Arc::new(Inner {
                state: SyncState::new(store),
                detector: ChangeDetector::new(self.report_system_info),
                registry,
                device,
                notifier: self.notifier,
                stats,
                policy: self.policy,
                runner,
                cycle_lock: Arc::new(Mutex::new(())),
            }),
        })
    }
}

impl Default for InstallationSynchronizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
