use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::discoverer::Discoverer;
use pkg_types::address::split_host_port;
use pkg_types::event::{EndpointEvent, EndpointEventKind};
use pkg_types::thirdparty::{DiscoveryConfig, RbdEndpoint};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// One entry of the JSON array published under the discovery key.
#[derive(Debug, Deserialize)]
struct PublishedEndpoint {
    endpoint: String,
    #[serde(default)]
    is_online: bool,
}

/// Stable id for a dynamic member.
pub fn endpoint_uuid(sid: &str, endpoint: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}/{}", sid, endpoint).as_bytes()).to_string()
}

/// Decode `[{"endpoint": "host[:port]", "is_online": bool}]`. Entries whose
/// address cannot be parsed are skipped.
pub fn decode_endpoints(sid: &str, value: &[u8]) -> anyhow::Result<Vec<RbdEndpoint>> {
    let published: Vec<PublishedEndpoint> = serde_json::from_slice(value)
        .map_err(|e| anyhow::anyhow!("Failed to decode endpoints for {}: {}", sid, e))?;

    let mut endpoints = Vec::with_capacity(published.len());
    for p in published {
        match split_host_port(&p.endpoint) {
            Ok((host, port)) => endpoints.push(RbdEndpoint {
                uuid: endpoint_uuid(sid, &p.endpoint),
                sid: sid.to_string(),
                ip: host,
                port: port.unwrap_or(0),
                is_online: p.is_online,
            }),
            Err(e) => warn!("Skipping endpoint '{}' of {}: {}", p.endpoint, sid, e),
        }
    }
    Ok(endpoints)
}

/// Discovery events turning `old` into `new`, keyed by uuid.
pub fn diff_endpoints(old: &[RbdEndpoint], new: &[RbdEndpoint]) -> Vec<EndpointEvent> {
    let before: HashMap<&str, &RbdEndpoint> = old.iter().map(|e| (e.uuid.as_str(), e)).collect();
    let after: HashMap<&str, &RbdEndpoint> = new.iter().map(|e| (e.uuid.as_str(), e)).collect();

    let mut events = Vec::new();
    for ep in new {
        match before.get(ep.uuid.as_str()) {
            None => events.push(EndpointEvent::discovery(EndpointEventKind::Create, ep.clone())),
            Some(prev) if *prev != ep => {
                events.push(EndpointEvent::discovery(EndpointEventKind::Update, ep.clone()))
            }
            Some(_) => {}
        }
    }
    for ep in old {
        if !after.contains_key(ep.uuid.as_str()) {
            events.push(EndpointEvent::discovery(EndpointEventKind::Delete, ep.clone()));
        }
    }
    events
}

/// Members published as a JSON list under one etcd key.
pub struct EtcdDiscoverer {
    cfg: DiscoveryConfig,
    client: Option<Client>,
    known: Vec<RbdEndpoint>,
}

impl EtcdDiscoverer {
    pub fn new(cfg: DiscoveryConfig) -> Self {
        Self {
            cfg,
            client: None,
            known: Vec::new(),
        }
    }

    fn client(&mut self) -> anyhow::Result<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("etcd discoverer for {} is not connected", self.cfg.service_id))
    }

    /// Apply a new member list, returning the events it implies.
    fn apply(&mut self, list: Vec<RbdEndpoint>) -> Vec<EndpointEvent> {
        let events = diff_endpoints(&self.known, &list);
        self.known = list;
        events
    }

    /// Follow the key on one watch stream. Returns `Ok(true)` when stopped
    /// or when nobody listens anymore, `Ok(false)` when the stream ended
    /// and should be re-established.
    async fn follow(
        &mut self,
        updates: &mpsc::Sender<EndpointEvent>,
        stop: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<bool> {
        let key = self.cfg.key.clone();
        let sid = self.cfg.service_id.clone();
        let client = self.client()?;
        let (_watcher, mut stream) = tokio::select! {
            res = client.watch(key.as_str(), None) => res
                .map_err(|e| anyhow::anyhow!("Failed to watch {}: {}", key, e))?,
            _ = stop.wait_for(|s| *s) => return Ok(true),
        };
        debug!("Watching etcd key {} for {}", key, sid);

        loop {
            let message = tokio::select! {
                m = stream.message() => m,
                _ = stop.wait_for(|s| *s) => return Ok(true),
            };
            let resp = match message {
                Ok(Some(resp)) => resp,
                Ok(None) => return Ok(false),
                Err(e) => {
                    warn!("Watch stream for {} failed: {}", key, e);
                    return Ok(false);
                }
            };
            if resp.canceled() {
                warn!("Watch on {} canceled by server", key);
                return Ok(false);
            }

            for event in resp.events() {
                let list = match event.event_type() {
                    EventType::Put => match event.kv() {
                        Some(kv) => match decode_endpoints(&sid, kv.value()) {
                            Ok(list) => list,
                            Err(e) => {
                                warn!("{}", e);
                                continue;
                            }
                        },
                        None => continue,
                    },
                    EventType::Delete => Vec::new(),
                };
                for ev in self.apply(list) {
                    debug!("Discovered {} {} for {}", ev.kind, ev.obj.ip, sid);
                    if updates.send(ev).await.is_err() {
                        return Ok(true);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Discoverer for EtcdDiscoverer {
    async fn connect(&mut self) -> anyhow::Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let options = match (&self.cfg.username, &self.cfg.password) {
            (Some(user), Some(password)) if !user.is_empty() => {
                Some(ConnectOptions::new().with_user(user.clone(), password.clone()))
            }
            _ => None,
        };
        let client = Client::connect(&self.cfg.servers, options).await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to etcd {:?} for {}: {}",
                self.cfg.servers,
                self.cfg.service_id,
                e
            )
        })?;
        info!("Connected to etcd {:?} for {}", self.cfg.servers, self.cfg.service_id);
        self.client = Some(client);
        Ok(())
    }

    async fn fetch(&mut self) -> anyhow::Result<Vec<RbdEndpoint>> {
        let key = self.cfg.key.clone();
        let sid = self.cfg.service_id.clone();
        let resp = self
            .client()?
            .get(key.as_str(), None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get {}: {}", key, e))?;
        let list = match resp.kvs().first() {
            Some(kv) => decode_endpoints(&sid, kv.value())?,
            None => Vec::new(),
        };
        self.known = list.clone();
        Ok(list)
    }

    async fn watch(
        &mut self,
        updates: mpsc::Sender<EndpointEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            if *stop.borrow() {
                return Ok(());
            }
            match self.follow(&updates, &mut stop).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => warn!("{}", e),
            }
            warn!("Watch on {} closed, reconnecting in 1s", self.cfg.key);
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = stop.wait_for(|s| *s) => return Ok(()),
            }
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if self.client.take().is_some() {
            debug!("Closed etcd client for {}", self.cfg.service_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(sid: &str, endpoint: &str, online: bool) -> RbdEndpoint {
        let (ip, port) = split_host_port(endpoint).unwrap();
        RbdEndpoint {
            uuid: endpoint_uuid(sid, endpoint),
            sid: sid.to_string(),
            ip,
            port: port.unwrap_or(0),
            is_online: online,
        }
    }

    #[test]
    fn test_decode_forms() {
        let raw = br#"[
            {"endpoint": "10.0.0.1:8080", "is_online": true},
            {"endpoint": "db.example.com"},
            {"endpoint": "[fe80::1]:443", "is_online": true},
            {"endpoint": "10.0.0.2:notaport", "is_online": true}
        ]"#;
        let eps = decode_endpoints("s1", raw).unwrap();
        assert_eq!(eps.len(), 3);

        assert_eq!(eps[0].ip, "10.0.0.1");
        assert_eq!(eps[0].port, 8080);
        assert!(eps[0].is_online);

        assert_eq!(eps[1].ip, "db.example.com");
        assert_eq!(eps[1].port, 0);
        assert!(!eps[1].is_online);

        assert_eq!(eps[2].ip, "fe80::1");
        assert_eq!(eps[2].port, 443);
        assert!(eps.iter().all(|e| e.sid == "s1"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_endpoints("s1", b"{not json").is_err());
        assert!(decode_endpoints("s1", b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_uuid_is_deterministic_per_sid() {
        assert_eq!(endpoint_uuid("s1", "10.0.0.1:80"), endpoint_uuid("s1", "10.0.0.1:80"));
        assert_ne!(endpoint_uuid("s1", "10.0.0.1:80"), endpoint_uuid("s2", "10.0.0.1:80"));
        assert_ne!(endpoint_uuid("s1", "10.0.0.1:80"), endpoint_uuid("s1", "10.0.0.1:81"));
    }

    #[test]
    fn test_diff_create_update_delete() {
        let old = vec![member("s1", "10.0.0.1:80", true), member("s1", "10.0.0.2:80", true)];
        let new = vec![member("s1", "10.0.0.2:80", false), member("s1", "10.0.0.3:80", true)];

        let events = diff_endpoints(&old, &new);
        let summary: Vec<_> = events.iter().map(|e| (e.kind, e.obj.ip.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (EndpointEventKind::Update, "10.0.0.2"),
                (EndpointEventKind::Create, "10.0.0.3"),
                (EndpointEventKind::Delete, "10.0.0.1"),
            ]
        );
        assert!(diff_endpoints(&new, &new).is_empty());
    }

    #[test]
    fn test_apply_tracks_last_list() {
        let cfg = DiscoveryConfig {
            service_id: "s1".to_string(),
            kind: Default::default(),
            servers: vec!["127.0.0.1:2379".to_string()],
            key: "/discovery/s1".to_string(),
            username: None,
            password: None,
        };
        let mut discoverer = EtcdDiscoverer::new(cfg);
        assert_eq!(discoverer.apply(vec![member("s1", "10.0.0.1:80", true)]).len(), 1);
        assert!(discoverer.apply(vec![member("s1", "10.0.0.1:80", true)]).is_empty());
        let gone = discoverer.apply(Vec::new());
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].kind, EndpointEventKind::Delete);
    }

    #[tokio::test]
    async fn test_fetch_requires_connect() {
        let cfg = DiscoveryConfig {
            service_id: "s1".to_string(),
            kind: Default::default(),
            servers: vec!["127.0.0.1:2379".to_string()],
            key: "/discovery/s1".to_string(),
            username: None,
            password: None,
        };
        let mut discoverer = EtcdDiscoverer::new(cfg);
        assert!(discoverer.fetch().await.is_err());
        discoverer.close().await.unwrap();
    }
}
