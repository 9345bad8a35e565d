use async_trait::async_trait;
use tracing::debug;

use crate::client::StateStore;
use pkg_constants::state::{CLUSTER_ENDPOINTS_PREFIX, CLUSTER_SERVICES_PREFIX};
use pkg_types::endpoint::Endpoints;
use pkg_types::service::ClusterService;

/// The slice of the cluster API the reconciler writes through.
///
/// Every write is a full-object replace keyed by `namespace/name`, so
/// calling `ensure_*` twice with the same object is a no-op and concurrent
/// writers converge on the last write.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create or replace an Endpoints object.
    async fn ensure_endpoints(&self, endpoints: &Endpoints) -> anyhow::Result<()>;

    /// Create or replace a Service object.
    async fn ensure_service(&self, service: &ClusterService) -> anyhow::Result<()>;

    /// Delete an Endpoints object. Missing objects are not an error.
    async fn delete_endpoints(&self, name: &str, namespace: &str) -> anyhow::Result<()>;

    /// Delete a Service object. Missing objects are not an error.
    async fn delete_service(&self, name: &str, namespace: &str) -> anyhow::Result<()>;

    async fn get_endpoints(&self, name: &str, namespace: &str) -> anyhow::Result<Option<Endpoints>>;

    async fn get_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> anyhow::Result<Option<ClusterService>>;
}

pub fn endpoints_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", CLUSTER_ENDPOINTS_PREFIX, namespace, name)
}

pub fn service_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", CLUSTER_SERVICES_PREFIX, namespace, name)
}

#[async_trait]
impl ClusterApi for StateStore {
    async fn ensure_endpoints(&self, endpoints: &Endpoints) -> anyhow::Result<()> {
        let key = endpoints_key(&endpoints.namespace, &endpoints.name);
        self.put_json(&key, endpoints).await?;
        debug!(
            "Ensured endpoints {}/{} ({} subsets)",
            endpoints.namespace,
            endpoints.name,
            endpoints.subsets.len()
        );
        Ok(())
    }

    async fn ensure_service(&self, service: &ClusterService) -> anyhow::Result<()> {
        let key = service_key(&service.namespace, &service.name);
        self.put_json(&key, service).await?;
        debug!("Ensured service {}/{}", service.namespace, service.name);
        Ok(())
    }

    async fn delete_endpoints(&self, name: &str, namespace: &str) -> anyhow::Result<()> {
        self.delete(&endpoints_key(namespace, name)).await
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> anyhow::Result<()> {
        self.delete(&service_key(namespace, name)).await
    }

    async fn get_endpoints(&self, name: &str, namespace: &str) -> anyhow::Result<Option<Endpoints>> {
        self.get_json(&endpoints_key(namespace, name)).await
    }

    async fn get_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> anyhow::Result<Option<ClusterService>> {
        self.get_json(&service_key(namespace, name)).await
    }
}
