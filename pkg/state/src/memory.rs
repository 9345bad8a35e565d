//! In-memory implementations of the registry and cluster contracts, for
//! single-process setups and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::cluster::ClusterApi;
use crate::registry::{DiscoveryConfigStore, EndpointStore, ProbeConfigStore, ServiceStore};
use pkg_types::endpoint::Endpoints;
use pkg_types::service::ClusterService;
use pkg_types::thirdparty::{DiscoveryConfig, ProbeConfig, RbdEndpoint, ThirdPartyService};

#[derive(Default)]
struct RegistryInner {
    services: BTreeMap<String, ThirdPartyService>,
    probes: HashMap<String, ProbeConfig>,
    /// sid → uuid → member
    endpoints: HashMap<String, BTreeMap<String, RbdEndpoint>>,
    discovery: HashMap<String, DiscoveryConfig>,
}

/// Third-party service inputs held in memory.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_service(&self, svc: ThirdPartyService) {
        self.inner.write().await.services.insert(svc.sid.clone(), svc);
    }

    pub async fn insert_probe_config(&self, cfg: ProbeConfig) {
        self.inner
            .write()
            .await
            .probes
            .insert(cfg.service_id.clone(), cfg);
    }

    pub async fn insert_endpoint(&self, ep: RbdEndpoint) {
        self.inner
            .write()
            .await
            .endpoints
            .entry(ep.sid.clone())
            .or_default()
            .insert(ep.uuid.clone(), ep);
    }

    pub async fn remove_endpoint(&self, sid: &str, uuid: &str) -> Option<RbdEndpoint> {
        self.inner
            .write()
            .await
            .endpoints
            .get_mut(sid)
            .and_then(|eps| eps.remove(uuid))
    }

    pub async fn insert_discovery_config(&self, cfg: DiscoveryConfig) {
        self.inner
            .write()
            .await
            .discovery
            .insert(cfg.service_id.clone(), cfg);
    }
}

#[async_trait]
impl ServiceStore for MemoryRegistry {
    async fn get(&self, sid: &str) -> anyhow::Result<Option<ThirdPartyService>> {
        Ok(self.inner.read().await.services.get(sid).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<ThirdPartyService>> {
        Ok(self.inner.read().await.services.values().cloned().collect())
    }
}

#[async_trait]
impl ProbeConfigStore for MemoryRegistry {
    async fn get_by_service_id(&self, sid: &str) -> anyhow::Result<Option<ProbeConfig>> {
        Ok(self.inner.read().await.probes.get(sid).cloned())
    }
}

#[async_trait]
impl EndpointStore for MemoryRegistry {
    async fn list(&self, sid: &str) -> anyhow::Result<Vec<RbdEndpoint>> {
        Ok(self
            .inner
            .read()
            .await
            .endpoints
            .get(sid)
            .map(|eps| eps.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DiscoveryConfigStore for MemoryRegistry {
    async fn get_by_service_id(&self, sid: &str) -> anyhow::Result<Option<DiscoveryConfig>> {
        Ok(self.inner.read().await.discovery.get(sid).cloned())
    }
}

#[derive(Default)]
struct ClusterInner {
    endpoints: BTreeMap<(String, String), Endpoints>,
    services: BTreeMap<(String, String), ClusterService>,
}

/// Cluster objects held in memory. Keys are `(namespace, name)`.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<RwLock<ClusterInner>>,
    writes: Arc<AtomicU64>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ensure/delete calls served so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub async fn list_endpoints(&self) -> Vec<Endpoints> {
        self.inner.read().await.endpoints.values().cloned().collect()
    }

    pub async fn list_services(&self) -> Vec<ClusterService> {
        self.inner.read().await.services.values().cloned().collect()
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn ensure_endpoints(&self, endpoints: &Endpoints) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let key = (endpoints.namespace.clone(), endpoints.name.clone());
        self.inner
            .write()
            .await
            .endpoints
            .insert(key, endpoints.clone());
        Ok(())
    }

    async fn ensure_service(&self, service: &ClusterService) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let key = (service.namespace.clone(), service.name.clone());
        self.inner.write().await.services.insert(key, service.clone());
        Ok(())
    }

    async fn delete_endpoints(&self, name: &str, namespace: &str) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.inner
            .write()
            .await
            .endpoints
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.inner
            .write()
            .await
            .services
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_endpoints(&self, name: &str, namespace: &str) -> anyhow::Result<Option<Endpoints>> {
        Ok(self
            .inner
            .read()
            .await
            .endpoints
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> anyhow::Result<Option<ClusterService>> {
        Ok(self
            .inner
            .read()
            .await
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::endpoint::{EndpointAddress, EndpointSubset};

    fn endpoints(name: &str, ip: &str) -> Endpoints {
        Endpoints {
            name: name.to_string(),
            namespace: "tenant-a".to_string(),
            labels: BTreeMap::new(),
            subsets: vec![EndpointSubset {
                addresses: vec![EndpointAddress::new(ip)],
                not_ready_addresses: vec![],
                ports: vec![],
            }],
        }
    }

    #[tokio::test]
    async fn test_ensure_replaces_whole_object() {
        let cluster = MemoryCluster::new();
        cluster.ensure_endpoints(&endpoints("web", "10.0.0.1")).await.unwrap();
        cluster.ensure_endpoints(&endpoints("web", "10.0.0.2")).await.unwrap();

        let all = cluster.list_endpoints().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].subsets[0].addresses[0].ip, "10.0.0.2");
        assert_eq!(cluster.write_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let cluster = MemoryCluster::new();
        assert!(cluster.delete_endpoints("nope", "tenant-a").await.is_ok());
        assert!(cluster.delete_service("nope", "tenant-a").await.is_ok());
        assert!(cluster.get_endpoints("nope", "tenant-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registry_endpoints_by_sid() {
        let registry = MemoryRegistry::new();
        for (uuid, sid) in [("u1", "s1"), ("u2", "s1"), ("u3", "s2")] {
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
        assert_eq!(EndpointStore::list(&registry, "s1").await.unwrap().len(), 2);
        assert_eq!(EndpointStore::list(&registry, "s2").await.unwrap().len(), 1);
        assert!(EndpointStore::list(&registry, "s3").await.unwrap().is_empty());

        registry.remove_endpoint("s1", "u1").await;
        assert_eq!(EndpointStore::list(&registry, "s1").await.unwrap().len(), 1);
    }
}
