pub mod manager;
pub mod probe;
pub mod probes;
pub mod watcher;

pub use manager::ProbeManager;
pub use probe::{DefaultProbeFactory, Probe, ProbeDefaults, ProbeFactory};
pub use watcher::Watcher;
