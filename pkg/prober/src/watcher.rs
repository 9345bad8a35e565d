use tokio::sync::mpsc;

use crate::manager::ProbeManager;
use pkg_types::probe::HealthStatus;

/// Subscription to the status events of one service name.
///
/// Created disabled by [`ProbeManager::watch_service_healthy`]. Closing
/// consumes the watcher, so nothing can read from it afterwards.
pub struct Watcher {
    id: String,
    service_name: String,
    rx: mpsc::Receiver<HealthStatus>,
    manager: ProbeManager,
}

impl Watcher {
    pub(crate) fn new(
        id: String,
        service_name: String,
        rx: mpsc::Receiver<HealthStatus>,
        manager: ProbeManager,
    ) -> Self {
        Self {
            id,
            service_name,
            rx,
            manager,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The receiving side, for use inside `tokio::select!`.
    pub fn watch(&mut self) -> &mut mpsc::Receiver<HealthStatus> {
        &mut self.rx
    }

    pub async fn recv(&mut self) -> Option<HealthStatus> {
        self.rx.recv().await
    }

    pub async fn close(self) -> anyhow::Result<()> {
        self.manager.close_watch(&self.service_name, &self.id).await
    }
}
