use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::discoverer::Discoverer;
use pkg_state::registry::EndpointStore;
use pkg_types::event::EndpointEvent;
use pkg_types::thirdparty::RbdEndpoint;

/// Members registered by hand, read from the endpoint store.
pub struct StaticDiscoverer {
    sid: String,
    store: Arc<dyn EndpointStore>,
}

impl StaticDiscoverer {
    pub fn new(sid: &str, store: Arc<dyn EndpointStore>) -> Self {
        Self {
            sid: sid.to_string(),
            store,
        }
    }
}

#[async_trait]
impl Discoverer for StaticDiscoverer {
    async fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn fetch(&mut self) -> anyhow::Result<Vec<RbdEndpoint>> {
        self.store.list(&self.sid).await
    }

    async fn watch(
        &mut self,
        _updates: mpsc::Sender<EndpointEvent>,
        _stop: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::memory::MemoryRegistry;

    #[tokio::test]
    async fn test_fetch_lists_only_own_sid() {
        let registry = MemoryRegistry::new();
        for (uuid, sid) in [("u1", "s1"), ("u2", "s2")] {
            registry
                .insert_endpoint(RbdEndpoint {
                    uuid: uuid.to_string(),
                    sid: sid.to_string(),
                    ip: "10.0.0.1".to_string(),
                    port: 80,
                    is_online: true,
                })
                .await;
        }

        let mut discoverer = StaticDiscoverer::new("s1", Arc::new(registry));
        discoverer.connect().await.unwrap();
        let eps = discoverer.fetch().await.unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].uuid, "u1");

        let (tx, _rx) = mpsc::channel(1);
        let (_stop_tx, stop_rx) = watch::channel(false);
        discoverer.watch(tx, stop_rx).await.unwrap();
        discoverer.close().await.unwrap();
    }
}
