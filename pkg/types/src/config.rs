use serde::{Deserialize, Serialize};

/// Worker configuration file (YAML).
///
/// Example `worker.yaml`:
/// ```yaml
/// data-dir: /var/lib/appm/data
/// log-level: info
/// probe:
///   default-interval-secs: 5
///   default-timeout-secs: 5
/// thirdparty:
///   start-attempts: 3
///   retry-interval-secs: 3
///   event-buffer: 1024
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "log-level")]
    pub log_level: Option<String>,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(default)]
    pub thirdparty: ThirdPartySection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeSection {
    /// Applied to health configs that leave the interval unset.
    #[serde(default, alias = "default-interval-secs")]
    pub default_interval_secs: Option<u64>,
    /// Applied to health configs that leave the timeout unset.
    #[serde(default, alias = "default-timeout-secs")]
    pub default_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThirdPartySection {
    #[serde(default, alias = "start-attempts")]
    pub start_attempts: Option<u32>,
    #[serde(default, alias = "retry-interval-secs")]
    pub retry_interval_secs: Option<u64>,
    #[serde(default, alias = "event-buffer")]
    pub event_buffer: Option<usize>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg: WorkerConfigFile =
            load_config_file("/nonexistent/appm/worker.yaml").unwrap();
        assert!(cfg.data_dir.is_none());
        assert!(cfg.thirdparty.start_attempts.is_none());
    }

    #[test]
    fn kebab_case_keys() {
        let yaml = r#"
data-dir: /var/lib/appm
log-level: debug
probe:
  default-interval-secs: 10
thirdparty:
  start-attempts: 5
  retry-interval-secs: 1
"#;
        let cfg: WorkerConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.data_dir.as_deref(), Some("/var/lib/appm"));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.probe.default_interval_secs, Some(10));
        assert!(cfg.probe.default_timeout_secs.is_none());
        assert_eq!(cfg.thirdparty.start_attempts, Some(5));
        assert_eq!(cfg.thirdparty.retry_interval_secs, Some(1));
        assert!(cfg.thirdparty.event_buffer.is_none());
    }
}
