use anyhow::bail;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::probe::{DefaultProbeFactory, Probe, ProbeDefaults, ProbeFactory};
use crate::probes::ProbeKind;
use crate::watcher::Watcher;
use pkg_constants::probe::{STATUS_CHANNEL_CAPACITY, WATCHER_CHANNEL_CAPACITY};
use pkg_types::probe::{HealthStatus, Service, Status};

struct WatcherSlot {
    tx: mpsc::Sender<HealthStatus>,
    enabled: bool,
}

#[derive(Default)]
struct ManagerState {
    services: Vec<Service>,
    probes: HashMap<String, Box<dyn Probe>>,
    status: HashMap<String, HealthStatus>,
    /// service name → watcher id → slot
    watches: HashMap<String, HashMap<String, WatcherSlot>>,
}

impl ManagerState {
    fn upsert_service(&mut self, svc: Service) {
        match self.services.iter_mut().find(|s| s.name == svc.name) {
            Some(existing) => *existing = svc,
            None => self.services.push(svc),
        }
    }

    fn stop_probe(&mut self, name: &str) -> bool {
        match self.probes.remove(name) {
            Some(mut probe) => {
                probe.stop();
                true
            }
            None => false,
        }
    }
}

struct Shared {
    state: Mutex<ManagerState>,
    results_tx: mpsc::Sender<HealthStatus>,
    results_rx: Mutex<Option<mpsc::Receiver<HealthStatus>>>,
    shutdown_tx: watch::Sender<bool>,
    factory: Arc<dyn ProbeFactory>,
    defaults: ProbeDefaults,
}

/// Owns the set of monitored services, one running probe per enabled
/// service, the last status per name, and the watchers subscribed to
/// each name.
///
/// All bookkeeping sits behind one lock. Statuses are recorded under it
/// and fanned out to watchers after it is released, in arrival order. A
/// full watcher channel delays delivery to every watcher but never the
/// manager's other operations.
#[derive(Clone)]
pub struct ProbeManager {
    shared: Arc<Shared>,
}

impl Default for ProbeManager {
    fn default() -> Self {
        Self::new(ProbeDefaults::default())
    }
}

impl ProbeManager {
    pub fn new(defaults: ProbeDefaults) -> Self {
        Self::with_factory(Arc::new(DefaultProbeFactory::new(defaults)), defaults)
    }

    pub fn with_factory(factory: Arc<dyn ProbeFactory>, defaults: ProbeDefaults) -> Self {
        let (results_tx, results_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ManagerState::default()),
                results_tx,
                results_rx: Mutex::new(Some(results_rx)),
                shutdown_tx,
                factory,
                defaults,
            }),
        }
    }

    /// Start the dispatch loop and a probe for every enabled service.
    pub async fn start(&self) -> anyhow::Result<JoinHandle<()>> {
        let Some(rx) = self.shared.results_rx.lock().await.take() else {
            bail!("probe manager already started");
        };
        let handle = tokio::spawn(dispatch(
            self.shared.clone(),
            rx,
            self.shared.shutdown_tx.subscribe(),
        ));
        self.update_all_services_probe().await;
        info!("Probe manager started");
        Ok(handle)
    }

    /// Cancel every probe and end the dispatch loop.
    pub async fn stop(&self) {
        let _ = self.shared.shutdown_tx.send(true);
        let mut state = self.shared.state.lock().await;
        for (_, mut probe) in state.probes.drain() {
            probe.stop();
        }
        info!("Probe manager stopped");
    }

    /// Replace the tracked service list without touching probes.
    pub async fn set_services(&self, services: Vec<Service>) {
        self.shared.state.lock().await.services = services;
    }

    /// Add or replace services by name without touching probes.
    pub async fn add_services(&self, services: Vec<Service>) {
        let mut state = self.shared.state.lock().await;
        for svc in services {
            state.upsert_service(svc);
        }
    }

    /// Track `svc` unless its name is already tracked. Returns whether the
    /// name was already present.
    pub async fn check_and_add_service(&self, svc: Service) -> bool {
        let mut state = self.shared.state.lock().await;
        let exists = state.services.iter().any(|s| s.name == svc.name);
        if !exists {
            state.services.push(svc);
        }
        exists
    }

    pub async fn services(&self) -> Vec<Service> {
        self.shared.state.lock().await.services.clone()
    }

    /// Replace the service list and restart every probe.
    pub async fn set_and_update_services(&self, services: Vec<Service>) {
        self.set_services(services).await;
        self.update_all_services_probe().await;
    }

    /// Add services and restart every probe.
    pub async fn add_and_update_services(&self, services: Vec<Service>) {
        self.add_services(services).await;
        self.update_all_services_probe().await;
    }

    async fn update_all_services_probe(&self) {
        let mut state = self.shared.state.lock().await;
        for (_, mut probe) in state.probes.drain() {
            probe.stop();
        }
        let services = state.services.clone();
        for svc in services.iter().filter(|s| !s.disabled) {
            self.spawn_probe(&mut state, svc);
        }
    }

    fn spawn_probe(&self, state: &mut ManagerState, svc: &Service) {
        match self.shared.factory.create(
            svc,
            self.shared.results_tx.clone(),
            self.shared.shutdown_tx.subscribe(),
        ) {
            Some(mut probe) => {
                probe.check();
                state.probes.insert(svc.name.clone(), probe);
                debug!("Started {} probe for {}", svc.health.model, svc.name);
            }
            None => warn!(
                "No probe could be built for {} (model {}, address '{}')",
                svc.name, svc.health.model, svc.health.address
            ),
        }
    }

    /// Make `services` the desired state for every sid they mention.
    ///
    /// Disabled entries are tracked without a probe. Unchanged entries keep
    /// their running probe. Changed or new entries get a fresh probe, the
    /// old one stopped first. Names previously tracked under one of these
    /// sids but absent from `services` are stopped and forgotten.
    pub async fn update_services_probe(&self, services: Vec<Service>) {
        let mut state = self.shared.state.lock().await;

        let sids: HashSet<&str> = services.iter().map(|s| s.sid.as_str()).collect();
        let mut stale: HashSet<String> = state
            .services
            .iter()
            .filter(|s| sids.contains(s.sid.as_str()))
            .map(|s| s.name.clone())
            .collect();

        for svc in &services {
            stale.remove(&svc.name);

            if svc.disabled {
                if state.stop_probe(&svc.name) {
                    debug!("Service {} disabled, probe stopped", svc.name);
                }
                state.upsert_service(svc.clone());
                continue;
            }

            let unchanged = state.probes.contains_key(&svc.name)
                && state.services.iter().any(|s| s == svc);
            if unchanged {
                continue;
            }

            state.stop_probe(&svc.name);
            self.spawn_probe(&mut state, svc);
            state.upsert_service(svc.clone());
        }

        for name in stale {
            state.stop_probe(&name);
            state.services.retain(|s| s.name != name);
            state.status.remove(&name);
            debug!("Dropped stale probe target {}", name);
        }
    }

    /// Stop the probes for `names` and forget those services along with
    /// their recorded status.
    pub async fn stop_probes(&self, names: &[String]) {
        let mut state = self.shared.state.lock().await;
        for name in names {
            if !state.stop_probe(name) {
                debug!("No running probe for {}", name);
            }
            state.services.retain(|s| &s.name != name);
            state.status.remove(name);
        }
    }

    pub async fn has_probe(&self, name: &str) -> bool {
        self.shared.state.lock().await.probes.contains_key(name)
    }

    /// Subscribe to status events for `name`. The watcher starts disabled;
    /// call [`ProbeManager::enable_watcher`] to begin delivery.
    pub async fn watch_service_healthy(&self, name: &str) -> Watcher {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);
        self.shared
            .state
            .lock()
            .await
            .watches
            .entry(name.to_string())
            .or_default()
            .insert(id.clone(), WatcherSlot { tx, enabled: false });
        Watcher::new(id, name.to_string(), rx, self.clone())
    }

    pub async fn enable_watcher(&self, name: &str, id: &str) {
        self.set_watcher_enabled(name, id, true).await;
    }

    /// Events arriving while disabled are dropped for this watcher.
    pub async fn disable_watcher(&self, name: &str, id: &str) {
        self.set_watcher_enabled(name, id, false).await;
    }

    async fn set_watcher_enabled(&self, name: &str, id: &str, enabled: bool) {
        let mut state = self.shared.state.lock().await;
        match state.watches.get_mut(name).and_then(|w| w.get_mut(id)) {
            Some(slot) => slot.enabled = enabled,
            None => warn!("Watcher {} for service {} not found", id, name),
        }
    }

    /// Remove a watcher and close its channel.
    pub async fn close_watch(&self, name: &str, id: &str) -> anyhow::Result<()> {
        let mut state = self.shared.state.lock().await;
        let Some(watchers) = state.watches.get_mut(name) else {
            bail!("no watchers registered for service {}", name);
        };
        if watchers.remove(id).is_none() {
            bail!("watcher {} for service {} not found", id, name);
        }
        if watchers.is_empty() {
            state.watches.remove(name);
        }
        Ok(())
    }

    /// Last recorded status for `name`.
    pub async fn get_service_healthy(&self, name: &str) -> Option<HealthStatus> {
        self.shared.state.lock().await.status.get(name).cloned()
    }

    /// Snapshot of every recorded status.
    pub async fn get_service_health(&self) -> HashMap<String, HealthStatus> {
        self.shared.state.lock().await.status.clone()
    }

    /// Run one check for `name` right now, bypassing its schedule and the
    /// recorded status.
    pub async fn current_service_health(&self, name: &str) -> anyhow::Result<HealthStatus> {
        let health = {
            let state = self.shared.state.lock().await;
            match state.services.iter().find(|s| s.name == name) {
                Some(svc) => svc.health.clone(),
                None => bail!("service {} is not tracked", name),
            }
        };
        let kind = ProbeKind::from_health(&health, self.shared.defaults.timeout);
        Ok(kind.check(name).await)
    }
}

/// Fill the fields a probe cannot know from the previous status of the
/// same name.
pub fn annotate(
    prev: Option<&HealthStatus>,
    mut status: HealthStatus,
    now: DateTime<Utc>,
) -> HealthStatus {
    status.last_status = prev.map(|p| p.status);
    status.status_changed = prev.is_some_and(|p| p.status != status.status);

    if status.status == Status::Healthy {
        status.error_number = 0;
        status.error_duration = Duration::ZERO;
        status.start_error_time = None;
    } else {
        let start = prev.and_then(|p| p.start_error_time).unwrap_or(now);
        status.error_number = prev.map_or(0, |p| p.error_number) + 1;
        status.start_error_time = Some(start);
        status.error_duration = (now - start).to_std().unwrap_or_default();
    }
    status
}

async fn dispatch(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<HealthStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let status = tokio::select! {
            next = rx.recv() => match next {
                Some(status) => status,
                None => return,
            },
            _ = shutdown.wait_for(|stopped| *stopped) => return,
        };

        let (status, targets) = {
            let mut state = shared.state.lock().await;
            // Left over in the channel from a probe that was stopped since.
            if !state.services.iter().any(|s| s.name == status.name) {
                debug!("Dropping status for untracked service {}", status.name);
                continue;
            }
            let status = annotate(state.status.get(&status.name), status, Utc::now());
            if status.status_changed {
                info!(
                    "Service {} changed {} -> {}: {}",
                    status.name,
                    status.last_status.map(|s| s.to_string()).unwrap_or_default(),
                    status.status,
                    status.info
                );
            }
            state.status.insert(status.name.clone(), status.clone());

            let targets: Vec<(String, mpsc::Sender<HealthStatus>)> = state
                .watches
                .get(&status.name)
                .map(|watchers| {
                    watchers
                        .iter()
                        .filter(|(_, slot)| slot.enabled)
                        .map(|(id, slot)| (id.clone(), slot.tx.clone()))
                        .collect()
                })
                .unwrap_or_default();
            (status, targets)
        };

        // Fan out after releasing the lock.
        for (id, tx) in targets {
            tokio::select! {
                sent = tx.send(status.clone()) => {
                    if sent.is_err() {
                        debug!("Watcher {} for {} is gone", id, status.name);
                    }
                }
                _ = shutdown.wait_for(|stopped| *stopped) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::probe::{Health, ProbeModel};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service(name: &str, sid: &str, address: &str) -> Service {
        Service {
            name: name.to_string(),
            sid: sid.to_string(),
            health: Health {
                name: name.to_string(),
                model: ProbeModel::Tcp,
                address: address.to_string(),
                time_interval: 1,
                ..Default::default()
            },
            disabled: false,
        }
    }

    /// Records probe lifecycles; probes never emit anything on their own.
    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        live: Arc<StdMutex<HashMap<String, usize>>>,
        max_live: Arc<AtomicUsize>,
        results: StdMutex<Option<mpsc::Sender<HealthStatus>>>,
    }

    struct CountingProbe {
        name: String,
        running: bool,
        live: Arc<StdMutex<HashMap<String, usize>>>,
        max_live: Arc<AtomicUsize>,
    }

    impl Probe for CountingProbe {
        fn name(&self) -> &str {
            &self.name
        }

        fn check(&mut self) {
            if self.running {
                return;
            }
            self.running = true;
            let mut live = self.live.lock().unwrap();
            let n = live.entry(self.name.clone()).or_default();
            *n += 1;
            self.max_live.fetch_max(*n, Ordering::SeqCst);
        }

        fn stop(&mut self) {
            if self.running {
                self.running = false;
                *self.live.lock().unwrap().entry(self.name.clone()).or_default() -= 1;
            }
        }
    }

    impl ProbeFactory for CountingFactory {
        fn create(
            &self,
            service: &Service,
            results: mpsc::Sender<HealthStatus>,
            _shutdown: watch::Receiver<bool>,
        ) -> Option<Box<dyn Probe>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            *self.results.lock().unwrap() = Some(results);
            Some(Box::new(CountingProbe {
                name: service.name.clone(),
                running: false,
                live: self.live.clone(),
                max_live: self.max_live.clone(),
            }))
        }
    }

    impl CountingFactory {
        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        fn live(&self, name: &str) -> usize {
            self.live.lock().unwrap().get(name).copied().unwrap_or(0)
        }

        /// Push a raw status as if a probe had produced it.
        async fn emit(&self, name: &str, status: Status, info: &str) {
            let tx = self.results.lock().unwrap().clone().unwrap();
            tx.send(HealthStatus::new(name, status, info)).await.unwrap();
        }
    }

    async fn manager_with_counting() -> (ProbeManager, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        let manager = ProbeManager::with_factory(factory.clone(), ProbeDefaults::default());
        manager.start().await.unwrap();
        (manager, factory)
    }

    async fn wait_for_info(manager: &ProbeManager, name: &str, info: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if manager
                    .get_service_healthy(name)
                    .await
                    .is_some_and(|s| s.info == info)
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_annotate_error_counting() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        let t2 = t0 + chrono::Duration::seconds(10);

        let first = annotate(None, HealthStatus::new("svc", Status::Unhealthy, ""), t0);
        assert_eq!(first.error_number, 1);
        assert!(!first.status_changed);
        assert_eq!(first.last_status, None);
        assert_eq!(first.start_error_time, Some(t0));

        let second = annotate(Some(&first), HealthStatus::new("svc", Status::Death, ""), t1);
        assert_eq!(second.error_number, 2);
        assert!(second.status_changed);
        assert_eq!(second.last_status, Some(Status::Unhealthy));
        assert_eq!(second.start_error_time, Some(t0));
        assert_eq!(second.error_duration, Duration::from_secs(5));

        let third = annotate(Some(&second), HealthStatus::new("svc", Status::Death, ""), t2);
        assert_eq!(third.error_number, 3);
        assert!(!third.status_changed);
        assert_eq!(third.error_duration, Duration::from_secs(10));

        let healed = annotate(Some(&third), HealthStatus::new("svc", Status::Healthy, ""), t2);
        assert_eq!(healed.error_number, 0);
        assert!(healed.status_changed);
        assert_eq!(healed.start_error_time, None);
        assert_eq!(healed.error_duration, Duration::ZERO);
    }

    #[test]
    fn test_annotate_first_healthy_is_not_a_change() {
        let status = annotate(None, HealthStatus::new("svc", Status::Healthy, ""), Utc::now());
        assert!(!status.status_changed);
        assert_eq!(status.error_number, 0);
    }

    #[tokio::test]
    async fn test_update_collects_stale_names() {
        let (manager, factory) = manager_with_counting().await;

        manager
            .update_services_probe(vec![
                service("a", "s1", "10.0.0.1:80"),
                service("b", "s1", "10.0.0.2:80"),
            ])
            .await;
        manager
            .update_services_probe(vec![service("other", "s2", "10.0.0.9:80")])
            .await;
        assert!(manager.has_probe("a").await);
        assert!(manager.has_probe("b").await);

        factory.emit("a", Status::Healthy, "a-ok").await;
        wait_for_info(&manager, "a", "a-ok").await;

        manager
            .update_services_probe(vec![
                service("b", "s1", "10.0.0.2:80"),
                service("c", "s1", "10.0.0.3:80"),
            ])
            .await;

        assert!(!manager.has_probe("a").await);
        assert!(manager.has_probe("b").await);
        assert!(manager.has_probe("c").await);
        assert!(manager.has_probe("other").await);
        assert_eq!(factory.live("a"), 0);
        assert!(manager.get_service_healthy("a").await.is_none());

        let mut names: Vec<_> = manager.services().await.into_iter().map(|s| s.name).collect();
        names.sort();
        assert_eq!(names, vec!["b", "c", "other"]);
        // b was unchanged, so only a, b, other, then c were ever created.
        assert_eq!(factory.created(), 4);
    }

    #[tokio::test]
    async fn test_changed_config_replaces_probe_without_overlap() {
        let (manager, factory) = manager_with_counting().await;

        manager
            .update_services_probe(vec![service("web", "s1", "10.0.0.1:80")])
            .await;
        manager
            .update_services_probe(vec![service("web", "s1", "10.0.0.1:80")])
            .await;
        assert_eq!(factory.created(), 1);

        for port in 81..90 {
            manager
                .update_services_probe(vec![service("web", "s1", &format!("10.0.0.1:{}", port))])
                .await;
        }
        assert_eq!(factory.created(), 10);
        assert_eq!(factory.live("web"), 1);
        assert_eq!(factory.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_service_tracked_without_probe() {
        let (manager, factory) = manager_with_counting().await;
        manager
            .update_services_probe(vec![service("web", "s1", "10.0.0.1:80")])
            .await;

        let mut disabled = service("web", "s1", "10.0.0.1:80");
        disabled.disabled = true;
        manager.update_services_probe(vec![disabled]).await;

        assert!(!manager.has_probe("web").await);
        assert_eq!(factory.live("web"), 0);
        assert!(manager.services().await[0].disabled);
    }

    #[tokio::test]
    async fn test_watcher_receives_in_order() {
        let (manager, factory) = manager_with_counting().await;
        manager
            .update_services_probe(vec![service("web", "s1", "10.0.0.1:80")])
            .await;

        let mut watcher = manager.watch_service_healthy("web").await;
        manager.enable_watcher("web", watcher.id()).await;

        let feeder = {
            let factory = factory.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    factory.emit("web", Status::Healthy, &format!("tick-{}", i)).await;
                }
            })
        };
        for i in 0..25 {
            let status = watcher.recv().await.unwrap();
            assert_eq!(status.info, format!("tick-{}", i));
        }
        feeder.await.unwrap();
        watcher.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_watcher_drops_events() {
        let (manager, factory) = manager_with_counting().await;
        manager
            .update_services_probe(vec![service("web", "s1", "10.0.0.1:80")])
            .await;
        let mut watcher = manager.watch_service_healthy("web").await;

        // Disabled on creation.
        factory.emit("web", Status::Healthy, "s0").await;
        wait_for_info(&manager, "web", "s0").await;

        manager.enable_watcher("web", watcher.id()).await;
        factory.emit("web", Status::Healthy, "s1").await;
        assert_eq!(watcher.recv().await.unwrap().info, "s1");

        manager.disable_watcher("web", watcher.id()).await;
        factory.emit("web", Status::Unhealthy, "s2").await;
        factory.emit("web", Status::Unhealthy, "s3").await;
        wait_for_info(&manager, "web", "s3").await;

        manager.enable_watcher("web", watcher.id()).await;
        factory.emit("web", Status::Unhealthy, "s4").await;
        let next = watcher.recv().await.unwrap();
        assert_eq!(next.info, "s4");
        // Counting continued while the watcher was disabled.
        assert_eq!(next.error_number, 3);
        assert!(!next.status_changed);
    }

    #[tokio::test]
    async fn test_stop_probes_forgets_status() {
        let (manager, factory) = manager_with_counting().await;
        manager
            .update_services_probe(vec![service("u1", "s1", "10.0.0.1:80")])
            .await;
        factory.emit("u1", Status::Death, "down").await;
        wait_for_info(&manager, "u1", "down").await;

        manager.stop_probes(&["u1".to_string()]).await;
        assert!(manager.get_service_health().await.is_empty());
        assert!(!manager.has_probe("u1").await);

        // Re-added under the same name, counting starts over.
        manager
            .update_services_probe(vec![service("u1", "s1", "10.0.0.1:80")])
            .await;
        factory.emit("u1", Status::Death, "down-again").await;
        wait_for_info(&manager, "u1", "down-again").await;
        let status = manager.get_service_healthy("u1").await.unwrap();
        assert_eq!(status.error_number, 1);
        assert_eq!(status.last_status, None);
    }

    #[tokio::test]
    async fn test_status_for_untracked_name_is_dropped() {
        let (manager, factory) = manager_with_counting().await;
        manager
            .update_services_probe(vec![service("web", "s1", "10.0.0.1:80")])
            .await;
        factory.emit("gone", Status::Death, "late").await;
        factory.emit("web", Status::Healthy, "ok").await;
        wait_for_info(&manager, "web", "ok").await;
        assert!(manager.get_service_healthy("gone").await.is_none());
    }

    #[tokio::test]
    async fn test_full_watcher_does_not_block_other_calls() {
        let (manager, factory) = manager_with_counting().await;
        manager
            .update_services_probe(vec![service("web", "s1", "10.0.0.1:80")])
            .await;
        let watcher = manager.watch_service_healthy("web").await;
        manager.enable_watcher("web", watcher.id()).await;

        for i in 0..=WATCHER_CHANNEL_CAPACITY {
            factory.emit("web", Status::Death, &format!("tick-{}", i)).await;
        }
        let last = format!("tick-{}", WATCHER_CHANNEL_CAPACITY);
        wait_for_info(&manager, "web", &last).await;

        let calls = async {
            manager
                .update_services_probe(vec![service("other", "s2", "10.0.0.2:80")])
                .await;
            manager.has_probe("other").await
        };
        let has_other = tokio::time::timeout(Duration::from_secs(2), calls).await.unwrap();
        assert!(has_other);
        drop(watcher);
    }

    #[tokio::test]
    async fn test_close_watch() {
        let manager = ProbeManager::default();
        let watcher = manager.watch_service_healthy("web").await;
        let id = watcher.id().to_string();
        manager.close_watch("web", &id).await.unwrap();
        assert!(manager.close_watch("web", &id).await.is_err());
        assert!(manager.close_watch("nope", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_service_list_helpers() {
        let manager = ProbeManager::default();
        assert!(!manager.check_and_add_service(service("a", "s1", "x:1")).await);
        assert!(manager.check_and_add_service(service("a", "s1", "y:1")).await);
        assert_eq!(manager.services().await[0].health.address, "x:1");

        manager
            .add_services(vec![service("a", "s1", "z:1"), service("b", "s1", "x:2")])
            .await;
        let services = manager.services().await;
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].health.address, "z:1");

        manager.stop_probes(&["a".to_string()]).await;
        assert_eq!(manager.services().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let manager = ProbeManager::default();
        manager.start().await.unwrap();
        assert!(manager.start().await.is_err());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_tcp_probe_against_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let manager = ProbeManager::default();
        manager.start().await.unwrap();
        let mut watcher = manager.watch_service_healthy("db").await;
        manager.enable_watcher("db", watcher.id()).await;
        manager.update_services_probe(vec![service("db", "s1", &addr)]).await;

        let status = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.status, Status::Death);
        assert_eq!(status.error_number, 1);
        assert!(status.info.contains("connection"));

        let now = manager.current_service_health("db").await.unwrap();
        assert_eq!(now.status, Status::Death);
        assert!(manager.current_service_health("missing").await.is_err());

        manager.stop().await;
        assert!(!manager.has_probe("db").await);
    }
}
