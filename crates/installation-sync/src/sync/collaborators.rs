//! Boundary traits for the collaborators the synchronizer depends on

use crate::error::{RegistryError, SyncError};
use crate::models::{DeviceSnapshot, Installation};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;

/// Stats counter incremented whenever a registration exchange fails
pub const REGISTRATION_SYNC_ERROR: &str = "registration_sync_error";

/// Remote exchange kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Patch,
    Fetch,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Patch => "patch",
            Operation::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend registry holding installation records
#[async_trait]
pub trait RemoteRegistryClient: Send + Sync {
    /// Create a new installation; the returned record carries its registration id
    async fn create(&self, delta: &Installation) -> Result<Installation, RegistryError>;

    /// Apply `delta` to the installation identified by `push_registration_id`
    async fn patch(
        &self,
        push_registration_id: &str,
        delta: &Installation,
    ) -> Result<(), RegistryError>;

    /// Read the installation identified by `push_registration_id`
    async fn get(&self, push_registration_id: &str) -> Result<Installation, RegistryError>;
}

/// Supplies the current system metadata and push token
pub trait DeviceSnapshotProvider: Send + Sync {
    fn snapshot(&self) -> DeviceSnapshot;
}

/// Events broadcast to the rest of the SDK
#[derive(Debug, Clone, PartialEq)]
pub enum InstallationEvent {
    Created(Installation),
    Updated(Installation),
    Error(SyncError),
}

/// Fire-and-forget event delivery; implementations must not block
pub trait Notifier: Send + Sync {
    fn notify(&self, event: InstallationEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: InstallationEvent) {}
}

/// Notifier fanning events out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<InstallationEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallationEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: InstallationEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

/// Best-effort error and exchange statistics
pub trait StatsRecorder: Send + Sync {
    fn record_error(&self, counter: &str);

    fn record_exchange(&self, _operation: Operation, _success: bool, _elapsed: Duration) {}
}

/// Discards every statistic
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

impl StatsRecorder for NoopStats {
    fn record_error(&self, _counter: &str) {}
}

/// Per-call completion callback, invoked at most once
pub trait InstallationListener: Send + Sync {
    fn on_success(&self, installation: Installation);

    fn on_error(&self, error: SyncError);
}

impl<F> InstallationListener for F
where
    F: Fn(Result<Installation, SyncError>) + Send + Sync,
{
    fn on_success(&self, installation: Installation) {
        self(Ok(installation))
    }

    fn on_error(&self, error: SyncError) {
        self(Err(error))
    }
}

/// Boxed optional listener as accepted by the synchronizer operations
pub type Listener = Option<Box<dyn InstallationListener>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_broadcast_notifier_delivers_to_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.notify(InstallationEvent::Error(SyncError::Cancelled));

        assert_eq!(
            rx.recv().await.unwrap(),
            InstallationEvent::Error(SyncError::Cancelled)
        );
    }

    #[test]
    fn test_broadcast_notifier_without_subscribers() {
        let notifier = BroadcastNotifier::default();
        notifier.notify(InstallationEvent::Updated(Installation::default()));
    }

    #[test]
    fn test_closure_listener() {
        let seen = Mutex::new(Vec::new());
        let listener = |result: Result<Installation, SyncError>| {
            seen.lock().unwrap().push(result.is_ok());
        };

        listener.on_success(Installation::default());
        listener.on_error(SyncError::Cancelled);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }
}
