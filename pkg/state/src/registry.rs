//! Read contracts for third-party service inputs, and their SlateDB layout.

use async_trait::async_trait;

use crate::client::StateStore;
use pkg_constants::state::{
    THIRDPARTY_DISCOVERY_PREFIX, THIRDPARTY_ENDPOINTS_PREFIX, THIRDPARTY_PROBES_PREFIX,
    THIRDPARTY_SERVICES_PREFIX,
};
use pkg_types::thirdparty::{DiscoveryConfig, ProbeConfig, RbdEndpoint, ThirdPartyService};

#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn get(&self, sid: &str) -> anyhow::Result<Option<ThirdPartyService>>;

    /// Every stored third-party service.
    async fn list(&self) -> anyhow::Result<Vec<ThirdPartyService>>;
}

#[async_trait]
pub trait ProbeConfigStore: Send + Sync {
    /// `None` when the service has no probe configured.
    async fn get_by_service_id(&self, sid: &str) -> anyhow::Result<Option<ProbeConfig>>;
}

/// Statically registered members of third-party services.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn list(&self, sid: &str) -> anyhow::Result<Vec<RbdEndpoint>>;
}

#[async_trait]
pub trait DiscoveryConfigStore: Send + Sync {
    /// `None` when the service has no dynamic discovery source.
    async fn get_by_service_id(&self, sid: &str) -> anyhow::Result<Option<DiscoveryConfig>>;
}

#[async_trait]
impl ServiceStore for StateStore {
    async fn get(&self, sid: &str) -> anyhow::Result<Option<ThirdPartyService>> {
        self.get_json(&format!("{}{}", THIRDPARTY_SERVICES_PREFIX, sid))
            .await
    }

    async fn list(&self) -> anyhow::Result<Vec<ThirdPartyService>> {
        self.list_json(THIRDPARTY_SERVICES_PREFIX).await
    }
}

#[async_trait]
impl ProbeConfigStore for StateStore {
    async fn get_by_service_id(&self, sid: &str) -> anyhow::Result<Option<ProbeConfig>> {
        self.get_json(&format!("{}{}", THIRDPARTY_PROBES_PREFIX, sid))
            .await
    }
}

#[async_trait]
impl EndpointStore for StateStore {
    async fn list(&self, sid: &str) -> anyhow::Result<Vec<RbdEndpoint>> {
        self.list_json(&format!("{}{}/", THIRDPARTY_ENDPOINTS_PREFIX, sid))
            .await
    }
}

#[async_trait]
impl DiscoveryConfigStore for StateStore {
    async fn get_by_service_id(&self, sid: &str) -> anyhow::Result<Option<DiscoveryConfig>> {
        self.get_json(&format!("{}{}", THIRDPARTY_DISCOVERY_PREFIX, sid))
            .await
    }
}

impl StateStore {
    pub async fn put_thirdparty_service(&self, svc: &ThirdPartyService) -> anyhow::Result<()> {
        self.put_json(&format!("{}{}", THIRDPARTY_SERVICES_PREFIX, svc.sid), svc)
            .await
    }

    pub async fn put_probe_config(&self, cfg: &ProbeConfig) -> anyhow::Result<()> {
        self.put_json(&format!("{}{}", THIRDPARTY_PROBES_PREFIX, cfg.service_id), cfg)
            .await
    }

    pub async fn put_endpoint(&self, ep: &RbdEndpoint) -> anyhow::Result<()> {
        let key = format!("{}{}/{}", THIRDPARTY_ENDPOINTS_PREFIX, ep.sid, ep.uuid);
        self.put_json(&key, ep).await
    }

    pub async fn put_discovery_config(&self, cfg: &DiscoveryConfig) -> anyhow::Result<()> {
        let key = format!("{}{}", THIRDPARTY_DISCOVERY_PREFIX, cfg.service_id);
        self.put_json(&key, cfg).await
    }
}
