use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::subset::{
    Target, build_services, build_targets, demote, describe, member_subset, normalize, promote,
    remove,
};
use crate::tpprobe::TpProber;
use pkg_constants::thirdparty::{DEFAULT_START_ATTEMPTS, DEFAULT_START_RETRY_INTERVAL_SECS};
use pkg_discovery::{Discoverer, DiscovererFactory, StaticDiscoverer};
use pkg_state::cluster::ClusterApi;
use pkg_state::registry::{DiscoveryConfigStore, EndpointStore, ServiceStore};
use pkg_types::address::encode_host;
use pkg_types::config::ThirdPartySection;
use pkg_types::event::{EndpointEvent, EndpointEventKind, EventSource, LifecycleEvent, LifecycleKind};
use pkg_types::service::ClusterService;
use pkg_types::thirdparty::{RbdEndpoint, ThirdPartyService};

/// Where a third-party service is in its lifecycle. A service with no
/// state is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Starting,
    Watching,
    Stopping,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Start attempts before the service falls back to stopped.
    pub start_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            start_attempts: DEFAULT_START_ATTEMPTS,
            retry_interval: Duration::from_secs(DEFAULT_START_RETRY_INTERVAL_SECS),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_section(section: &ThirdPartySection) -> Self {
        let defaults = Self::default();
        Self {
            start_attempts: section.start_attempts.unwrap_or(defaults.start_attempts),
            retry_interval: section
                .retry_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_interval),
        }
    }
}

/// Stores the reconciler reads its inputs from.
#[derive(Clone)]
pub struct ThirdPartySources {
    pub services: Arc<dyn ServiceStore>,
    pub endpoints: Arc<dyn EndpointStore>,
    pub discovery: Arc<dyn DiscoveryConfigStore>,
}

struct ServiceEntry {
    state: ReconcileState,
    /// Distinguishes this start from a later one for the same sid.
    generation: u64,
    stop_tx: watch::Sender<bool>,
    service: Option<ThirdPartyService>,
    members: Vec<RbdEndpoint>,
    /// uuids a probe took offline
    offline: HashSet<String>,
    targets: Vec<Target>,
    services: Vec<ClusterService>,
}

impl ServiceEntry {
    fn starting(generation: u64, stop_tx: watch::Sender<bool>) -> Self {
        Self {
            state: ReconcileState::Starting,
            generation,
            stop_tx,
            service: None,
            members: Vec::new(),
            offline: HashSet::new(),
            targets: Vec::new(),
            services: Vec::new(),
        }
    }

    fn member(&self, uuid: &str) -> Option<&RbdEndpoint> {
        self.members.iter().find(|m| m.uuid == uuid)
    }

    fn set_online(&mut self, uuid: &str, online: bool) {
        if let Some(m) = self.members.iter_mut().find(|m| m.uuid == uuid) {
            m.is_online = online;
        }
    }

    /// Members not taken offline by a probe.
    fn visible(&self) -> Vec<RbdEndpoint> {
        self.members
            .iter()
            .filter(|m| !self.offline.contains(&m.uuid))
            .cloned()
            .collect()
    }

    fn rebuild(&mut self) -> anyhow::Result<()> {
        let Some(service) = &self.service else {
            anyhow::bail!("service metadata missing");
        };
        let visible = self.visible();
        self.targets = build_targets(service, &visible)?;
        self.services = build_services(service, &self.targets, &visible);
        Ok(())
    }

    /// Recompute Services after subsets were edited in place, so the domain
    /// annotation follows the visible members.
    fn refresh_services(&mut self) {
        if let Some(service) = &self.service {
            self.services = build_services(service, &self.targets, &self.visible());
        }
    }
}

/// Static members first, dynamic ones replacing any static member with the
/// same uuid.
fn merge_members(statics: Vec<RbdEndpoint>, dynamic: Vec<RbdEndpoint>) -> Vec<RbdEndpoint> {
    let dynamic_ids: HashSet<String> = dynamic.iter().map(|e| e.uuid.clone()).collect();
    statics
        .into_iter()
        .filter(|e| !dynamic_ids.contains(&e.uuid))
        .chain(dynamic)
        .collect()
}

/// Keeps the Endpoints and Service objects of third-party services in line
/// with their members and the members' health.
///
/// Lifecycle events start and stop services; endpoint events (from probes
/// through [`TpProber`], or from discovery watches) edit the objects of a
/// running service.
#[derive(Clone)]
pub struct ThirdPartier {
    config: ReconcilerConfig,
    sources: ThirdPartySources,
    discoverers: Arc<dyn DiscovererFactory>,
    cluster: Arc<dyn ClusterApi>,
    prober: TpProber,
    updates: mpsc::Sender<EndpointEvent>,
    registry: Arc<Mutex<HashMap<String, ServiceEntry>>>,
    generation: Arc<AtomicU64>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ThirdPartier {
    /// `updates` must feed the receiver later passed to [`ThirdPartier::start`];
    /// discovery watches publish into it.
    pub fn new(
        config: ReconcilerConfig,
        sources: ThirdPartySources,
        discoverers: Arc<dyn DiscovererFactory>,
        cluster: Arc<dyn ClusterApi>,
        prober: TpProber,
        updates: mpsc::Sender<EndpointEvent>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            sources,
            discoverers,
            cluster,
            prober,
            updates,
            registry: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Spawn the lifecycle and update loops.
    pub fn start(
        &self,
        mut lifecycle: mpsc::Receiver<LifecycleEvent>,
        mut updates: mpsc::Receiver<EndpointEvent>,
    ) -> JoinHandle<()> {
        info!(
            "ThirdPartier started (start_attempts={}, retry_interval={}s)",
            self.config.start_attempts,
            self.config.retry_interval.as_secs()
        );

        let this = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let lifecycle_loop = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = lifecycle.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = shutdown.wait_for(|s| *s) => break,
                };
                match event.kind {
                    LifecycleKind::Start => this.on_start(event.sid).await,
                    LifecycleKind::Stop => this.on_stop(&event.sid).await,
                }
            }
        });

        let this = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let update_loop = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = updates.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = shutdown.wait_for(|s| *s) => break,
                };
                let (sid, kind, ip) = (event.obj.sid.clone(), event.kind, event.obj.ip.clone());
                if let Err(e) = this.on_update(event).await {
                    warn!("ThirdPartier {} event for {} ({}) failed: {}", kind, sid, ip, e);
                }
            }
        });

        tokio::spawn(async move {
            let _ = tokio::join!(lifecycle_loop, update_loop);
            info!("ThirdPartier stopped");
        })
    }

    /// End both loops and release every running service without touching
    /// the objects already written.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut registry = self.registry.lock().await;
        for (sid, entry) in registry.drain() {
            let _ = entry.stop_tx.send(true);
            self.prober.stop_service(&sid).await;
        }
    }

    pub async fn state(&self, sid: &str) -> Option<ReconcileState> {
        self.registry.lock().await.get(sid).map(|e| e.state)
    }

    async fn on_start(&self, sid: String) {
        let (generation, stop_rx) = {
            let mut registry = self.registry.lock().await;
            if let Some(entry) = registry.get(&sid) {
                debug!("Ignoring start of {}: already {:?}", sid, entry.state);
                return;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let (stop_tx, stop_rx) = watch::channel(false);
            registry.insert(sid.clone(), ServiceEntry::starting(generation, stop_tx));
            (generation, stop_rx)
        };

        let this = self.clone();
        tokio::spawn(async move { this.run_start(sid, generation, stop_rx).await });
    }

    async fn run_start(&self, sid: String, generation: u64, mut stop: watch::Receiver<bool>) {
        let attempts = self.config.start_attempts.max(1);
        for attempt in 1..=attempts {
            if *stop.borrow() {
                return;
            }
            match self.try_start(&sid, generation, &stop).await {
                Ok(()) => return,
                Err(e) => warn!(
                    "Start of third-party service {} failed (attempt {}/{}): {}",
                    sid, attempt, attempts, e
                ),
            }
            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.retry_interval) => {}
                    _ = stop.wait_for(|s| *s) => return,
                }
            }
        }

        let mut registry = self.registry.lock().await;
        if registry.get(&sid).is_some_and(|e| e.generation == generation) {
            registry.remove(&sid);
        }
        warn!("Giving up on third-party service {} until its next start", sid);
    }

    async fn try_start(
        &self,
        sid: &str,
        generation: u64,
        stop: &watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let service = self
            .sources
            .services
            .get(sid)
            .await?
            .ok_or_else(|| anyhow::anyhow!("service metadata not found"))?;

        let mut statics = StaticDiscoverer::new(sid, self.sources.endpoints.clone());
        statics.connect().await?;
        let mut members = statics.fetch().await?;
        statics.close().await?;
        let mut discoverer: Option<Box<dyn Discoverer>> = None;
        if let Some(cfg) = self.sources.discovery.get_by_service_id(sid).await? {
            let mut d = self.discoverers.create(&cfg)?;
            d.connect().await?;
            let dynamic = d.fetch().await?;
            debug!("Discovered {} dynamic members for {}", dynamic.len(), sid);
            members = merge_members(members, dynamic);
            discoverer = Some(d);
        }
        if members.is_empty() {
            anyhow::bail!("no endpoints");
        }

        let targets = build_targets(&service, &members)?;
        let services = build_services(&service, &targets, &members);

        let mut registry = self.registry.lock().await;
        let Some(entry) = registry
            .get_mut(sid)
            .filter(|e| e.generation == generation && e.state == ReconcileState::Starting)
        else {
            debug!("Start of {} superseded, discarding", sid);
            if let Some(mut d) = discoverer {
                let _ = d.close().await;
            }
            return Ok(());
        };

        self.ensure(&targets, &services).await?;
        self.prober.add_probes(sid, &members).await;

        info!(
            "Third-party service {} started with {} members in {} objects",
            sid,
            members.len(),
            targets.len()
        );
        entry.state = ReconcileState::Watching;
        entry.service = Some(service);
        entry.members = members;
        entry.targets = targets;
        entry.services = services;
        drop(registry);

        if let Some(mut d) = discoverer {
            let updates = self.updates.clone();
            let stop = stop.clone();
            let sid = sid.to_string();
            tokio::spawn(async move {
                if let Err(e) = d.watch(updates, stop).await {
                    warn!("Discovery watch for {} ended: {}", sid, e);
                }
                let _ = d.close().await;
            });
        }
        Ok(())
    }

    async fn on_stop(&self, sid: &str) {
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry.get_mut(sid) else {
            warn!("Stop for third-party service {} which is not running", sid);
            return;
        };
        entry.state = ReconcileState::Stopping;
        let _ = entry.stop_tx.send(true);

        for t in &entry.targets {
            if let Err(e) = self
                .cluster
                .delete_endpoints(&t.endpoints.name, &t.endpoints.namespace)
                .await
            {
                warn!("Failed to delete endpoints {}: {}", t.endpoints.name, e);
            }
        }
        for s in &entry.services {
            if let Err(e) = self.cluster.delete_service(&s.name, &s.namespace).await {
                warn!("Failed to delete service {}: {}", s.name, e);
            }
        }
        self.prober.stop_service(sid).await;
        registry.remove(sid);
        info!("Third-party service {} stopped", sid);
    }

    async fn on_update(&self, event: EndpointEvent) -> anyhow::Result<()> {
        let sid = event.obj.sid.clone();
        let uuid = event.obj.uuid.clone();
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry
            .get_mut(&sid)
            .filter(|e| e.state == ReconcileState::Watching)
        else {
            debug!("Dropping {} event for {}: not watching", event.kind, sid);
            return Ok(());
        };

        match (event.source, event.kind) {
            (EventSource::Probe, kind) => {
                let Some(member) = entry.member(&uuid).cloned() else {
                    debug!("Dropping {} event for unknown member {} of {}", kind, uuid, sid);
                    return Ok(());
                };
                let (ip, _) = encode_host(&member.ip);
                match kind {
                    EndpointEventKind::Healthy => {
                        entry.set_online(&uuid, true);
                        entry.offline.remove(&uuid);
                        for t in entry.targets.iter_mut() {
                            if !promote(&mut t.endpoints, &uuid, &ip) {
                                let mut subsets = std::mem::take(&mut t.endpoints.subsets);
                                subsets.push(member_subset(&t.port, &member, true));
                                t.endpoints.subsets = normalize(subsets);
                            }
                        }
                    }
                    EndpointEventKind::Unhealthy => {
                        entry.set_online(&uuid, false);
                        for t in entry.targets.iter_mut() {
                            demote(&mut t.endpoints, &uuid, &ip);
                        }
                    }
                    EndpointEventKind::Delete => {
                        entry.offline.insert(uuid.clone());
                        for t in entry.targets.iter_mut() {
                            remove(&mut t.endpoints, &uuid, &ip);
                        }
                    }
                    other => {
                        debug!("Ignoring probe {} event for {}", other, uuid);
                        return Ok(());
                    }
                }
                entry.refresh_services();
            }
            (EventSource::Discovery, EndpointEventKind::Create | EndpointEventKind::Update) => {
                match entry.members.iter_mut().find(|m| m.uuid == uuid) {
                    Some(existing) => *existing = event.obj.clone(),
                    None => entry.members.push(event.obj.clone()),
                }
                entry.rebuild()?;
                self.prober.add_probes(&sid, &entry.members).await;
            }
            (EventSource::Discovery, EndpointEventKind::Delete) => {
                entry.members.retain(|m| m.uuid != uuid);
                entry.offline.remove(&uuid);
                entry.rebuild()?;
                self.prober.remove_probe(&sid, &uuid).await;
            }
            (EventSource::Discovery, other) => {
                debug!("Ignoring discovery {} event for {}", other, uuid);
                return Ok(());
            }
        }

        self.ensure(&entry.targets, &entry.services).await
    }

    async fn ensure(&self, targets: &[Target], services: &[ClusterService]) -> anyhow::Result<()> {
        for (i, t) in targets.iter().enumerate() {
            self.cluster.ensure_endpoints(&t.endpoints).await.map_err(|e| {
                anyhow::anyhow!("ensure endpoints {}/{}: {}", t.endpoints.namespace, t.endpoints.name, e)
            })?;
            let annotations = services
                .get(i)
                .or(services.first())
                .map(|s| s.annotations.clone())
                .unwrap_or_default();
            debug!("Ensured {}", describe(&t.endpoints, &annotations));
        }
        for s in services {
            self.cluster
                .ensure_service(s)
                .await
                .map_err(|e| anyhow::anyhow!("ensure service {}/{}: {}", s.namespace, s.name, e))?;
        }
        Ok(())
    }
}
