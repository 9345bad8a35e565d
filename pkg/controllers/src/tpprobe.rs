use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pkg_prober::{ProbeManager, Watcher};
use pkg_state::registry::ProbeConfigStore;
use pkg_types::address::join_host_port;
use pkg_types::event::{EndpointEvent, EndpointEventKind};
use pkg_types::probe::{Health, HealthStatus, ProbeModel, Service};
use pkg_types::thirdparty::{FailureAction, ProbeConfig, RbdEndpoint};

/// Probe target for one member. The probe is named after the member uuid.
pub fn probe_service(cfg: &ProbeConfig, ep: &RbdEndpoint) -> Service {
    let port = if cfg.port != 0 { cfg.port } else { ep.port };
    let address = match cfg.scheme {
        ProbeModel::Tcp => join_host_port(&ep.ip, port),
        ProbeModel::Http => {
            let path = if cfg.path.starts_with('/') || cfg.path.is_empty() {
                cfg.path.clone()
            } else {
                format!("/{}", cfg.path)
            };
            format!("http://{}{}", join_host_port(&ep.ip, port), path)
        }
        ProbeModel::Cmd => cfg.cmd.clone(),
    };
    let unprobeable = match cfg.scheme {
        ProbeModel::Cmd => cfg.cmd.is_empty(),
        _ => port == 0,
    };

    Service {
        name: ep.uuid.clone(),
        sid: ep.sid.clone(),
        health: Health {
            name: ep.uuid.clone(),
            model: cfg.scheme,
            address,
            time_interval: cfg.period_seconds,
            max_errors_num: cfg.failure_threshold,
            timeout: cfg.timeout_seconds,
        },
        disabled: unprobeable,
    }
}

/// Map one health event to the endpoint event it implies, if any.
pub fn translate(status: &HealthStatus, cfg: &ProbeConfig) -> Option<EndpointEventKind> {
    if status.is_healthy() {
        return Some(EndpointEventKind::Healthy);
    }
    if status.error_number < cfg.failure_threshold {
        return None;
    }
    match cfg.failure_action {
        FailureAction::Offline => Some(EndpointEventKind::Delete),
        FailureAction::Ignore => Some(EndpointEventKind::Unhealthy),
    }
}

struct Relay {
    service: Service,
    member: RbdEndpoint,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Relay {
    fn stop(self) {
        let _ = self.stop_tx.send(true);
        drop(self.handle);
    }
}

/// Bridges probe health into endpoint events for third-party services.
///
/// Each probed member gets a relay task that watches its probe and turns
/// status changes into Healthy / Unhealthy / Delete events on the shared
/// update channel.
#[derive(Clone)]
pub struct TpProber {
    manager: ProbeManager,
    configs: Arc<dyn ProbeConfigStore>,
    updates: mpsc::Sender<EndpointEvent>,
    /// sid → uuid → relay
    tracked: Arc<Mutex<HashMap<String, HashMap<String, Relay>>>>,
}

impl TpProber {
    pub fn new(
        manager: ProbeManager,
        configs: Arc<dyn ProbeConfigStore>,
        updates: mpsc::Sender<EndpointEvent>,
    ) -> Self {
        Self {
            manager,
            configs,
            updates,
            tracked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn probe_config(&self, sid: &str) -> ProbeConfig {
        match self.configs.get_by_service_id(sid).await {
            Ok(Some(cfg)) => cfg,
            Ok(None) => ProbeConfig::default_for(sid),
            Err(e) => {
                warn!("Failed to load probe config for {}, using default: {}", sid, e);
                ProbeConfig::default_for(sid)
            }
        }
    }

    /// Probe `eps` and relay their health. Members already probed with the
    /// same target keep their relay; others tracked for `sid` are untouched.
    pub async fn add_probes(&self, sid: &str, eps: &[RbdEndpoint]) {
        let cfg = self.probe_config(sid).await;
        let mut tracked = self.tracked.lock().await;
        let relays = tracked.entry(sid.to_string()).or_default();

        for ep in eps {
            let service = probe_service(&cfg, ep);
            if let Some(relay) = relays.get(&ep.uuid) {
                if relay.service == service && relay.member == *ep {
                    continue;
                }
            }
            if let Some(old) = relays.remove(&ep.uuid) {
                old.stop();
            }
            let relay = self.spawn_relay(&cfg, ep, service).await;
            relays.insert(ep.uuid.clone(), relay);
        }

        let services: Vec<Service> = relays.values().map(|r| r.service.clone()).collect();
        info!("Probing {} members of {} with {}", services.len(), sid, cfg.scheme);
        self.manager.update_services_probe(services).await;
    }

    async fn spawn_relay(&self, cfg: &ProbeConfig, ep: &RbdEndpoint, service: Service) -> Relay {
        let watcher = self.manager.watch_service_healthy(&ep.uuid).await;
        self.manager.enable_watcher(&ep.uuid, watcher.id()).await;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(relay(
            watcher,
            cfg.clone(),
            ep.clone(),
            self.updates.clone(),
            stop_rx,
        ));
        Relay {
            service,
            member: ep.clone(),
            stop_tx,
            handle,
        }
    }

    /// Stop probing one member.
    pub async fn remove_probe(&self, sid: &str, uuid: &str) {
        let removed = self
            .tracked
            .lock()
            .await
            .get_mut(sid)
            .and_then(|relays| relays.remove(uuid));
        match removed {
            Some(relay) => relay.stop(),
            None => debug!("No relay for {} in {}", uuid, sid),
        }
        self.manager.stop_probes(&[uuid.to_string()]).await;
    }

    /// Stop probing every member of `sid`.
    pub async fn stop_service(&self, sid: &str) {
        let Some(relays) = self.tracked.lock().await.remove(sid) else {
            debug!("No probes tracked for {}", sid);
            return;
        };
        let names: Vec<String> = relays.keys().cloned().collect();
        for (_, relay) in relays {
            relay.stop();
        }
        self.manager.stop_probes(&names).await;
        info!("Stopped {} probes of {}", names.len(), sid);
    }

    pub async fn tracked_members(&self, sid: &str) -> Vec<String> {
        self.tracked
            .lock()
            .await
            .get(sid)
            .map(|relays| relays.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Forward translated status changes for one member. The watcher is
/// drained even while `updates` is full; only the newest undelivered kind
/// is kept.
async fn relay(
    mut watcher: Watcher,
    cfg: ProbeConfig,
    member: RbdEndpoint,
    updates: mpsc::Sender<EndpointEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let mut last: Option<EndpointEventKind> = None;
    let mut pending: Option<EndpointEventKind> = None;
    loop {
        tokio::select! {
            status = watcher.recv() => {
                let Some(status) = status else {
                    break;
                };
                let Some(kind) = translate(&status, &cfg) else {
                    continue;
                };
                if pending.or(last) == Some(kind) {
                    continue;
                }
                debug!("Member {} of {} is {}: {}", member.ip, member.sid, kind, status.info);
                pending = (last != Some(kind)).then_some(kind);
            }
            permit = updates.reserve(), if pending.is_some() => {
                let Ok(permit) = permit else {
                    break;
                };
                if let Some(kind) = pending.take() {
                    permit.send(EndpointEvent::probe(kind, member.clone()));
                    last = Some(kind);
                }
            }
            _ = stop.wait_for(|s| *s) => break,
        }
    }

    if let Err(e) = watcher.close().await {
        debug!("Closing watcher for {}: {}", member.uuid, e);
    }
}
