use serde::{Deserialize, Serialize};

use crate::thirdparty::RbdEndpoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleKind {
    Start,
    Stop,
}

/// Starts or stops reconciliation of one third-party service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub sid: String,
}

impl LifecycleEvent {
    pub fn start(sid: impl Into<String>) -> Self {
        Self {
            kind: LifecycleKind::Start,
            sid: sid.into(),
        }
    }

    pub fn stop(sid: impl Into<String>) -> Self {
        Self {
            kind: LifecycleKind::Stop,
            sid: sid.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EndpointEventKind {
    Create,
    Update,
    Delete,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for EndpointEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointEventKind::Create => write!(f, "create"),
            EndpointEventKind::Update => write!(f, "update"),
            EndpointEventKind::Delete => write!(f, "delete"),
            EndpointEventKind::Healthy => write!(f, "healthy"),
            EndpointEventKind::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Who produced an [`EndpointEvent`].
///
/// A `Delete` from discovery means the member is gone; a `Delete` from a
/// probe only takes the member out of the cluster objects while its probe
/// keeps running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventSource {
    Discovery,
    Probe,
}

/// A change to one member of a third-party service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointEvent {
    pub kind: EndpointEventKind,
    pub source: EventSource,
    pub obj: RbdEndpoint,
}

impl EndpointEvent {
    pub fn discovery(kind: EndpointEventKind, obj: RbdEndpoint) -> Self {
        Self {
            kind,
            source: EventSource::Discovery,
            obj,
        }
    }

    pub fn probe(kind: EndpointEventKind, obj: RbdEndpoint) -> Self {
        Self {
            kind,
            source: EventSource::Probe,
            obj,
        }
    }
}
