//! The three check kinds. Each performs one synchronous check and turns the
//! outcome into a [`HealthStatus`]; failures never escape as errors.

use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time;

use pkg_constants::probe::{HTTP_UNHEALTHY_STATUS, PROBE_SHELL};
use pkg_types::probe::{Health, HealthStatus, ProbeModel, Status};

/// HTTP GET check. Transport errors are `death`, 5xx is `unhealthy`,
/// everything else (4xx included) is `healthy`.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new(address: &str, timeout: Duration) -> Self {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url,
            timeout,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn run(&self, name: &str) -> HealthStatus {
        match time::timeout(self.timeout, self.client.get(&self.url).send()).await {
            Ok(Ok(resp)) => {
                let code = resp.status().as_u16();
                if code >= HTTP_UNHEALTHY_STATUS {
                    HealthStatus::new(
                        name,
                        Status::Unhealthy,
                        format!("GET {} returned {}", self.url, code),
                    )
                } else {
                    HealthStatus::new(name, Status::Healthy, format!("http {}", code))
                }
            }
            Ok(Err(e)) => HealthStatus::new(
                name,
                Status::Death,
                format!("GET {} failed: {}", self.url, e),
            ),
            Err(_) => HealthStatus::new(
                name,
                Status::Death,
                format!("GET {} timed out after {:?}", self.url, self.timeout),
            ),
        }
    }
}

/// TCP connect check.
#[derive(Debug, Clone)]
pub struct TcpCheck {
    address: String,
    timeout: Duration,
}

impl TcpCheck {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }

    async fn run(&self, name: &str) -> HealthStatus {
        match time::timeout(self.timeout, TcpStream::connect(self.address.as_str())).await {
            Ok(Ok(_)) => HealthStatus::new(
                name,
                Status::Healthy,
                format!("connection to {} established", self.address),
            ),
            Ok(Err(e)) => HealthStatus::new(
                name,
                Status::Death,
                format!("connection to {} failed: {}", self.address, e),
            ),
            Err(_) => HealthStatus::new(
                name,
                Status::Death,
                format!("connection to {} timed out after {:?}", self.address, self.timeout),
            ),
        }
    }
}

/// Shell command check: exit 0 is healthy, anything else is `death` with
/// stderr as info.
#[derive(Debug, Clone)]
pub struct ShellCheck {
    command: String,
    timeout: Duration,
}

impl ShellCheck {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            timeout,
        }
    }

    async fn run(&self, name: &str) -> HealthStatus {
        let output = Command::new(PROBE_SHELL)
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match time::timeout(self.timeout, output).await {
            Ok(Ok(out)) if out.status.success() => {
                HealthStatus::new(name, Status::Healthy, String::new())
            }
            Ok(Ok(out)) => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                let info = if stderr.is_empty() {
                    format!("command exited with {}", out.status)
                } else {
                    stderr
                };
                HealthStatus::new(name, Status::Death, info)
            }
            Ok(Err(e)) => HealthStatus::new(
                name,
                Status::Death,
                format!("failed to run '{}': {}", self.command, e),
            ),
            Err(_) => HealthStatus::new(
                name,
                Status::Death,
                format!("'{}' timed out after {:?}", self.command, self.timeout),
            ),
        }
    }
}

/// A check, picked once from the health config's model.
#[derive(Debug, Clone)]
pub enum ProbeKind {
    Http(HttpCheck),
    Tcp(TcpCheck),
    Shell(ShellCheck),
}

impl ProbeKind {
    /// Build the check for `health`, using `default_timeout` when it sets none.
    pub fn from_health(health: &Health, default_timeout: Duration) -> Self {
        let timeout = health.timeout_or(default_timeout);
        match health.model {
            ProbeModel::Http => ProbeKind::Http(HttpCheck::new(&health.address, timeout)),
            ProbeModel::Tcp => ProbeKind::Tcp(TcpCheck::new(&health.address, timeout)),
            ProbeModel::Cmd => ProbeKind::Shell(ShellCheck::new(&health.address, timeout)),
        }
    }

    /// Run one check on behalf of the service `name`.
    pub async fn check(&self, name: &str) -> HealthStatus {
        match self {
            ProbeKind::Http(c) => c.run(name).await,
            ProbeKind::Tcp(c) => c.run(name).await,
            ProbeKind::Shell(c) => c.run(name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use tokio::net::TcpListener;

    async fn serve_fixture() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { StatusCode::OK }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr.to_string()
    }

    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[test]
    fn test_http_scheme_defaulted() {
        let check = HttpCheck::new("10.0.0.1:8080/healthz", Duration::from_secs(1));
        assert_eq!(check.url(), "http://10.0.0.1:8080/healthz");
        let check = HttpCheck::new("https://example.com/", Duration::from_secs(1));
        assert_eq!(check.url(), "https://example.com/");
    }

    #[tokio::test]
    async fn test_http_status_classification() {
        let addr = serve_fixture().await;
        let timeout = Duration::from_secs(2);

        let ok = HttpCheck::new(&format!("{}/ok", addr), timeout).run("svc").await;
        assert_eq!(ok.status, Status::Healthy);

        // 4xx from a health endpoint is not a failure.
        let missing = HttpCheck::new(&format!("{}/missing", addr), timeout)
            .run("svc")
            .await;
        assert_eq!(missing.status, Status::Healthy);

        let down = HttpCheck::new(&format!("{}/down", addr), timeout).run("svc").await;
        assert_eq!(down.status, Status::Unhealthy);
        assert!(down.info.contains("503"), "info was {}", down.info);
    }

    #[tokio::test]
    async fn test_http_transport_error_is_death() {
        let addr = closed_port().await;
        let status = HttpCheck::new(&addr, Duration::from_secs(2)).run("svc").await;
        assert_eq!(status.status, Status::Death);
    }

    #[tokio::test]
    async fn test_tcp_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().to_string();
        let status = TcpCheck::new(&open, Duration::from_secs(2)).run("svc").await;
        assert_eq!(status.status, Status::Healthy);

        let closed = closed_port().await;
        let status = TcpCheck::new(&closed, Duration::from_secs(2)).run("svc").await;
        assert_eq!(status.status, Status::Death);
        assert!(status.info.contains("connection"), "info was {}", status.info);
    }

    #[tokio::test]
    async fn test_shell_exit_codes() {
        let timeout = Duration::from_secs(5);
        let ok = ShellCheck::new("true", timeout).run("svc").await;
        assert_eq!(ok.status, Status::Healthy);

        let failed = ShellCheck::new("echo boom >&2; exit 3", timeout)
            .run("svc")
            .await;
        assert_eq!(failed.status, Status::Death);
        assert_eq!(failed.info, "boom");
    }

    #[tokio::test]
    async fn test_shell_timeout_is_death() {
        let status = ShellCheck::new("sleep 5", Duration::from_millis(100))
            .run("svc")
            .await;
        assert_eq!(status.status, Status::Death);
        assert!(status.info.contains("timed out"));
    }

    #[test]
    fn test_kind_from_model() {
        let mut health = Health {
            name: "svc".to_string(),
            model: ProbeModel::Cmd,
            address: "true".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ProbeKind::from_health(&health, Duration::from_secs(1)),
            ProbeKind::Shell(_)
        ));
        health.model = ProbeModel::Http;
        assert!(matches!(
            ProbeKind::from_health(&health, Duration::from_secs(1)),
            ProbeKind::Http(_)
        ));
        health.model = ProbeModel::Tcp;
        assert!(matches!(
            ProbeKind::from_health(&health, Duration::from_secs(1)),
            ProbeKind::Tcp(_)
        ));
    }
}
