use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of check a probe performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeModel {
    Http,
    #[default]
    Tcp,
    Cmd,
}

impl std::fmt::Display for ProbeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeModel::Http => write!(f, "http"),
            ProbeModel::Tcp => write!(f, "tcp"),
            ProbeModel::Cmd => write!(f, "cmd"),
        }
    }
}

/// Probe configuration attached to a [`Service`].
///
/// A running probe never sees this mutate: changing any field means the
/// manager stops the old probe and starts a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Health {
    pub name: String,
    pub model: ProbeModel,
    /// `host:port` for tcp, a URL for http, a shell command for cmd.
    pub address: String,
    #[serde(default)]
    pub time_interval: u64,
    #[serde(default)]
    pub max_errors_num: u32,
    #[serde(default)]
    pub timeout: u64,
}

impl Health {
    /// Check interval, or `default` when unset.
    pub fn interval_or(&self, default: Duration) -> Duration {
        if self.time_interval == 0 {
            default
        } else {
            Duration::from_secs(self.time_interval)
        }
    }

    /// Per-check timeout, or `default` when unset.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        if self.timeout == 0 {
            default
        } else {
            Duration::from_secs(self.timeout)
        }
    }
}

/// A monitored target. `name` is the unique key inside a probe manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Service {
    pub name: String,
    /// Id of the entity owning this target.
    pub sid: String,
    pub health: Health,
    #[serde(default)]
    pub disabled: bool,
}

/// Result of a single check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Unhealthy,
    Death,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Healthy => write!(f, "healthy"),
            Status::Unhealthy => write!(f, "unhealthy"),
            Status::Death => write!(f, "death"),
        }
    }
}

/// Health event emitted on every probe tick.
///
/// Probes fill `name`, `status` and `info`; the manager derives the rest
/// from the previous status of the same name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub name: String,
    pub status: Status,
    #[serde(default)]
    pub error_number: u32,
    #[serde(default)]
    pub error_duration: Duration,
    #[serde(default)]
    pub start_error_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub last_status: Option<Status>,
    #[serde(default)]
    pub status_changed: bool,
}

impl HealthStatus {
    /// A raw probe result, before the manager annotates it.
    pub fn new(name: impl Into<String>, status: Status, info: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            error_number: 0,
            error_duration: Duration::ZERO,
            start_error_time: None,
            info: info.into(),
            last_status: None,
            status_changed: false,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == Status::Healthy
    }
}
