use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::etcd::EtcdDiscoverer;
use pkg_types::event::EndpointEvent;
use pkg_types::thirdparty::{DiscoveryConfig, DiscoveryKind, RbdEndpoint};

/// A source of third-party service members.
#[async_trait]
pub trait Discoverer: Send {
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Current member list.
    async fn fetch(&mut self) -> anyhow::Result<Vec<RbdEndpoint>>;

    /// Push member changes into `updates` until `stop` fires or the
    /// receiver is dropped. Sources without change notification return
    /// immediately.
    async fn watch(
        &mut self,
        updates: mpsc::Sender<EndpointEvent>,
        stop: watch::Receiver<bool>,
    ) -> anyhow::Result<()>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Builds the dynamic discoverer for a service's discovery config.
pub trait DiscovererFactory: Send + Sync {
    fn create(&self, cfg: &DiscoveryConfig) -> anyhow::Result<Box<dyn Discoverer>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EtcdDiscovererFactory;

impl DiscovererFactory for EtcdDiscovererFactory {
    fn create(&self, cfg: &DiscoveryConfig) -> anyhow::Result<Box<dyn Discoverer>> {
        match cfg.kind {
            DiscoveryKind::Etcd => {
                if cfg.servers.is_empty() {
                    anyhow::bail!("discovery config for {} lists no servers", cfg.service_id);
                }
                Ok(Box::new(EtcdDiscoverer::new(cfg.clone())))
            }
        }
    }
}
