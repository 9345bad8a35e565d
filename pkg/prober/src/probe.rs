use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::probes::ProbeKind;
use pkg_constants::probe::{DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_PROBE_TIMEOUT_SECS};
use pkg_types::probe::{HealthStatus, Service};

/// A running health check bound to one service.
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    /// Start the check loop. Does nothing if it is already running.
    fn check(&mut self);

    /// Cancel the check loop. Safe to call more than once.
    fn stop(&mut self);
}

/// Builds probes for the manager. Returning `None` means the service's
/// health config cannot be probed and the service is left without one.
pub trait ProbeFactory: Send + Sync {
    fn create(
        &self,
        service: &Service,
        results: mpsc::Sender<HealthStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> Option<Box<dyn Probe>>;
}

/// Interval and timeout used when a health config leaves them at zero.
#[derive(Debug, Clone, Copy)]
pub struct ProbeDefaults {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ProbeDefaults {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProbeFactory {
    pub defaults: ProbeDefaults,
}

impl DefaultProbeFactory {
    pub fn new(defaults: ProbeDefaults) -> Self {
        Self { defaults }
    }
}

impl ProbeFactory for DefaultProbeFactory {
    fn create(
        &self,
        service: &Service,
        results: mpsc::Sender<HealthStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> Option<Box<dyn Probe>> {
        if service.health.address.is_empty() {
            return None;
        }
        let kind = ProbeKind::from_health(&service.health, self.defaults.timeout);
        Some(Box::new(ScheduledProbe::new(
            &service.name,
            kind,
            service.health.interval_or(self.defaults.interval),
            results,
            shutdown,
        )))
    }
}

/// Runs a [`ProbeKind`] on a fixed interval: check, deliver, sleep.
///
/// The loop ends on [`Probe::stop`], on manager shutdown, when the
/// probe is dropped, or when the results channel is closed.
pub struct ScheduledProbe {
    name: String,
    kind: ProbeKind,
    interval: Duration,
    results: mpsc::Sender<HealthStatus>,
    shutdown: watch::Receiver<bool>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledProbe {
    pub fn new(
        name: &str,
        kind: ProbeKind,
        interval: Duration,
        results: mpsc::Sender<HealthStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            interval,
            results,
            shutdown,
            stop_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Probe for ScheduledProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&mut self) {
        if self.stop_tx.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        self.stop_tx = Some(stop_tx);
        self.handle = Some(tokio::spawn(run_loop(
            self.name.clone(),
            self.kind.clone(),
            self.interval,
            self.results.clone(),
            stop_rx,
            self.shutdown.clone(),
        )));
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
            debug!("Stopped probe for {}", self.name);
        }
    }
}

/// Resolves once `rx` holds `true` or its sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

async fn run_loop(
    name: String,
    kind: ProbeKind,
    interval: Duration,
    results: mpsc::Sender<HealthStatus>,
    mut stop: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let status = tokio::select! {
            status = kind.check(&name) => status,
            _ = cancelled(&mut stop) => return,
            _ = cancelled(&mut shutdown) => return,
        };

        tokio::select! {
            sent = results.send(status) => {
                if sent.is_err() {
                    debug!("Results channel closed, probe {} exiting", name);
                    return;
                }
            }
            _ = cancelled(&mut stop) => return,
            _ = cancelled(&mut shutdown) => return,
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancelled(&mut stop) => return,
            _ = cancelled(&mut shutdown) => return,
        }
    }
}
