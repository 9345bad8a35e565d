use serde::{Deserialize, Serialize};

use crate::probe::ProbeModel;
use pkg_constants::probe::{DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_PROBE_TIMEOUT_SECS};
use pkg_constants::thirdparty::DEFAULT_FAILURE_THRESHOLD;

/// A member (host + port) of a third-party service.
///
/// `uuid` is the stable identity: it names the member's probe and the
/// endpoint port it owns in the cluster objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RbdEndpoint {
    pub uuid: String,
    pub sid: String,
    /// Literal IP or a domain name.
    pub ip: String,
    /// 0 means "use the service's container port".
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub is_online: bool,
}

/// A port declared on a third-party service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicePort {
    pub container_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub is_inner_service: bool,
    #[serde(default)]
    pub is_outer_service: bool,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// Descriptor of a third-party service: where its objects live and what
/// they are called.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThirdPartyService {
    pub sid: String,
    /// Namespace the cluster objects are written to (the tenant id).
    pub namespace: String,
    pub tenant_name: String,
    pub service_alias: String,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

/// What happens to a member once its probe crosses the failure threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    /// Remove the address from the cluster objects entirely.
    Offline,
    /// Keep the address, demoted to not-ready.
    #[default]
    #[serde(other)]
    Ignore,
}

impl std::fmt::Display for FailureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureAction::Offline => write!(f, "offline"),
            FailureAction::Ignore => write!(f, "ignore"),
        }
    }
}

/// Probe settings stored for a third-party service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeConfig {
    pub service_id: String,
    #[serde(default)]
    pub scheme: ProbeModel,
    /// 0 means "probe the member's own port".
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub cmd: String,
    #[serde(default = "default_period")]
    pub period_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default)]
    pub failure_action: FailureAction,
}

fn default_period() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}

fn default_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl ProbeConfig {
    /// Config applied when nothing is stored for `service_id`:
    /// tcp every 5s, 3 failures, failure action `ignore`.
    pub fn default_for(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            scheme: ProbeModel::Tcp,
            port: 0,
            path: String::new(),
            cmd: String::new(),
            period_seconds: DEFAULT_PROBE_INTERVAL_SECS,
            timeout_seconds: DEFAULT_PROBE_TIMEOUT_SECS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_action: FailureAction::Ignore,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryKind {
    #[default]
    Etcd,
}

/// Where the dynamic members of a third-party service are published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub service_id: String,
    #[serde(default)]
    pub kind: DiscoveryKind,
    pub servers: Vec<String>,
    pub key: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_failure_action_means_ignore() {
        let action: FailureAction = serde_json::from_str("\"offline\"").unwrap();
        assert_eq!(action, FailureAction::Offline);
        let action: FailureAction = serde_json::from_str("\"readiness\"").unwrap();
        assert_eq!(action, FailureAction::Ignore);
    }

    #[test]
    fn sparse_probe_config_gets_defaults() {
        let cfg: ProbeConfig =
            serde_json::from_str(r#"{"service_id":"sid-1","scheme":"http","path":"/healthz"}"#)
                .unwrap();
        assert_eq!(cfg.scheme, ProbeModel::Http);
        assert_eq!(cfg.period_seconds, 5);
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.failure_action, FailureAction::Ignore);
    }

    #[test]
    fn default_probe_config() {
        let cfg = ProbeConfig::default_for("sid-1");
        assert_eq!(cfg.scheme, ProbeModel::Tcp);
        assert_eq!(cfg.period_seconds, 5);
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.failure_action, FailureAction::Ignore);
    }
}
