//! Pure shaping of third-party members into cluster objects.
//!
//! Every member gets its own subset whose single port is named after the
//! member's uuid, so probe events can find "their" address without knowing
//! anything else about the object.

use std::collections::{BTreeMap, BTreeSet};

use pkg_constants::thirdparty::{DOMAIN_ANNOTATION, OUTER_SERVICE_SUFFIX, SERVICE_ID_LABEL};
use pkg_types::address::{decode_host, encode_host};
use pkg_types::endpoint::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints};
use pkg_types::service::{ClusterService, ClusterServicePort};
use pkg_types::thirdparty::{RbdEndpoint, ServicePort, ThirdPartyService};

/// An Endpoints object together with the service port it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub port: ServicePort,
    pub outer: bool,
    pub endpoints: Endpoints,
}

fn object_name(svc: &ThirdPartyService, port: u16, outer: bool) -> String {
    let name = format!("{}-{}-{}", svc.tenant_name, svc.service_alias, port);
    if outer {
        name + OUTER_SERVICE_SUFFIX
    } else {
        name
    }
}

fn object_labels(svc: &ThirdPartyService, outer: bool) -> BTreeMap<String, String> {
    let suffix = if outer { "ServiceOUT" } else { "Service" };
    BTreeMap::from([
        (SERVICE_ID_LABEL.to_string(), svc.sid.clone()),
        ("name".to_string(), format!("{}{}", svc.service_alias, suffix)),
    ])
}

/// The single-member subset for `ep` under `port`. A member without its
/// own port uses the container port.
pub fn member_subset(port: &ServicePort, ep: &RbdEndpoint, ready: bool) -> EndpointSubset {
    let (ip, _) = encode_host(&ep.ip);
    let target_port = if ep.port == 0 { port.container_port } else { ep.port };
    let address = vec![EndpointAddress::new(ip)];
    let (addresses, not_ready_addresses) = if ready {
        (address, Vec::new())
    } else {
        (Vec::new(), address)
    };
    EndpointSubset {
        addresses,
        not_ready_addresses,
        ports: vec![EndpointPort {
            name: ep.uuid.clone(),
            port: target_port,
            protocol: port.protocol.clone(),
        }],
    }
}

/// Build one Endpoints object per declared port and exposure (inner/outer).
pub fn build_targets(
    svc: &ThirdPartyService,
    members: &[RbdEndpoint],
) -> anyhow::Result<Vec<Target>> {
    if svc.ports.is_empty() {
        anyhow::bail!("third-party service {} declares no ports", svc.sid);
    }

    let mut targets = Vec::new();
    for port in &svc.ports {
        let exposures = [(port.is_inner_service, false), (port.is_outer_service, true)];
        for (_, outer) in exposures.into_iter().filter(|(enabled, _)| *enabled) {
            let subsets = members
                .iter()
                .map(|ep| member_subset(port, ep, ep.is_online))
                .collect();
            targets.push(Target {
                port: port.clone(),
                outer,
                endpoints: Endpoints {
                    name: object_name(svc, port.container_port, outer),
                    namespace: svc.namespace.clone(),
                    labels: object_labels(svc, outer),
                    subsets: normalize(subsets),
                },
            });
        }
    }
    Ok(targets)
}

/// Selector-less Services fronting `targets`. The first one carries the
/// domain annotation when a member is a domain.
pub fn build_services(
    svc: &ThirdPartyService,
    targets: &[Target],
    members: &[RbdEndpoint],
) -> Vec<ClusterService> {
    let domain = members.iter().find_map(|ep| encode_host(&ep.ip).1);

    targets
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut annotations = BTreeMap::new();
            if let (0, Some(domain)) = (i, &domain) {
                annotations.insert(DOMAIN_ANNOTATION.to_string(), domain.clone());
            }
            ClusterService {
                name: t.endpoints.name.clone(),
                namespace: t.endpoints.namespace.clone(),
                labels: t.endpoints.labels.clone(),
                annotations,
                ports: vec![ClusterServicePort {
                    name: format!(
                        "{}-{}",
                        t.port.protocol.to_lowercase(),
                        t.port.container_port
                    ),
                    port: t.port.container_port,
                    target_port: t.port.container_port,
                    protocol: t.port.protocol.clone(),
                }],
            }
        })
        .collect()
}

/// Merge subsets with identical port sets and de-duplicate addresses,
/// ready winning over not-ready. Order of first appearance is kept and
/// addresses are sorted, so equal inputs give equal objects.
pub fn normalize(subsets: Vec<EndpointSubset>) -> Vec<EndpointSubset> {
    let mut merged: Vec<(BTreeSet<EndpointPort>, BTreeSet<EndpointAddress>, BTreeSet<EndpointAddress>)> =
        Vec::new();

    for subset in subsets {
        let ports: BTreeSet<EndpointPort> = subset.ports.into_iter().collect();
        let idx = match merged.iter().position(|(p, _, _)| *p == ports) {
            Some(idx) => idx,
            None => {
                merged.push((ports, BTreeSet::new(), BTreeSet::new()));
                merged.len() - 1
            }
        };
        let (_, ready, not_ready) = &mut merged[idx];
        ready.extend(subset.addresses);
        not_ready.extend(subset.not_ready_addresses);
    }

    merged
        .into_iter()
        .map(|(ports, ready, not_ready)| EndpointSubset {
            not_ready_addresses: not_ready.difference(&ready).cloned().collect(),
            addresses: ready.into_iter().collect(),
            ports: ports.into_iter().collect(),
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Mark `ip` ready in the subsets owned by `uuid`. Returns false when no
/// subset is owned by `uuid`, e.g. after [`remove`].
pub fn promote(endpoints: &mut Endpoints, uuid: &str, ip: &str) -> bool {
    let mut found = false;
    for subset in endpoints.subsets.iter_mut().filter(|s| s.has_port_named(uuid)) {
        found = true;
        subset.not_ready_addresses.retain(|a| a.ip != ip);
        if !subset.addresses.iter().any(|a| a.ip == ip) {
            subset.addresses.push(EndpointAddress::new(ip));
        }
    }
    found
}

/// Mark `ip` not ready in the subsets owned by `uuid`.
pub fn demote(endpoints: &mut Endpoints, uuid: &str, ip: &str) -> bool {
    let mut found = false;
    for subset in endpoints.subsets.iter_mut().filter(|s| s.has_port_named(uuid)) {
        found = true;
        subset.addresses.retain(|a| a.ip != ip);
        if !subset.not_ready_addresses.iter().any(|a| a.ip == ip) {
            subset.not_ready_addresses.push(EndpointAddress::new(ip));
        }
    }
    found
}

/// Take `ip` out of the subsets owned by `uuid`, dropping subsets left
/// without addresses.
pub fn remove(endpoints: &mut Endpoints, uuid: &str, ip: &str) -> bool {
    let mut found = false;
    for subset in endpoints.subsets.iter_mut().filter(|s| s.has_port_named(uuid)) {
        found = true;
        subset.addresses.retain(|a| a.ip != ip);
        subset.not_ready_addresses.retain(|a| a.ip != ip);
    }
    endpoints.subsets.retain(|s| !s.is_empty());
    found
}

/// Human readable summary with domains restored, for logs.
pub fn describe(endpoints: &Endpoints, annotations: &BTreeMap<String, String>) -> String {
    let render = |addrs: &[EndpointAddress]| {
        addrs
            .iter()
            .map(|a| decode_host(&a.ip, annotations))
            .collect::<Vec<_>>()
            .join(",")
    };
    let ready: Vec<String> = endpoints
        .subsets
        .iter()
        .map(|s| render(&s.addresses))
        .filter(|s| !s.is_empty())
        .collect();
    let not_ready: Vec<String> = endpoints
        .subsets
        .iter()
        .map(|s| render(&s.not_ready_addresses))
        .filter(|s| !s.is_empty())
        .collect();
    format!(
        "{}/{} ready=[{}] not_ready=[{}]",
        endpoints.namespace,
        endpoints.name,
        ready.join(","),
        not_ready.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::thirdparty::DOMAIN_PLACEHOLDER_IP;

    fn service() -> ThirdPartyService {
        ThirdPartyService {
            sid: "sid-1".to_string(),
            namespace: "tenant-a".to_string(),
            tenant_name: "acme".to_string(),
            service_alias: "gr1234".to_string(),
            ports: vec![ServicePort {
                container_port: 8080,
                protocol: "TCP".to_string(),
                is_inner_service: true,
                is_outer_service: true,
            }],
        }
    }

    fn member(uuid: &str, ip: &str, port: u16, online: bool) -> RbdEndpoint {
        RbdEndpoint {
            uuid: uuid.to_string(),
            sid: "sid-1".to_string(),
            ip: ip.to_string(),
            port,
            is_online: online,
        }
    }

    #[test]
    fn test_build_names_labels_and_ports() {
        let members = vec![member("u1", "10.0.0.1", 80, true), member("u2", "10.0.0.2", 0, false)];
        let targets = build_targets(&service(), &members).unwrap();
        assert_eq!(targets.len(), 2);

        let inner = &targets[0].endpoints;
        assert_eq!(inner.name, "acme-gr1234-8080");
        assert_eq!(inner.namespace, "tenant-a");
        assert_eq!(inner.labels["name"], "gr1234Service");
        assert_eq!(inner.labels[SERVICE_ID_LABEL], "sid-1");
        assert_eq!(targets[1].endpoints.name, "acme-gr1234-8080-out");
        assert_eq!(targets[1].endpoints.labels["name"], "gr1234ServiceOUT");

        assert_eq!(inner.subsets.len(), 2);
        assert_eq!(inner.subsets[0].ports[0].name, "u1");
        assert_eq!(inner.subsets[0].ports[0].port, 80);
        assert_eq!(inner.subsets[0].addresses[0].ip, "10.0.0.1");
        // Port 0 falls back to the container port; offline goes not-ready.
        assert_eq!(inner.subsets[1].ports[0].port, 8080);
        assert_eq!(inner.subsets[1].not_ready_addresses[0].ip, "10.0.0.2");
    }

    #[test]
    fn test_no_ports_is_an_error() {
        let mut svc = service();
        svc.ports.clear();
        assert!(build_targets(&svc, &[]).is_err());
    }

    #[test]
    fn test_domain_placeholder_round_trip() {
        let members = vec![member("u1", "db.example.com", 5432, true)];
        let targets = build_targets(&service(), &members).unwrap();
        let services = build_services(&service(), &targets, &members);

        let ep = &targets[0].endpoints;
        assert_eq!(ep.subsets[0].addresses[0].ip, DOMAIN_PLACEHOLDER_IP);
        assert_eq!(services[0].annotations[DOMAIN_ANNOTATION], "db.example.com");
        assert!(services[1].annotations.is_empty());
        assert!(describe(ep, &services[0].annotations).contains("db.example.com"));

        // The annotation follows the member list.
        let plain = vec![member("u2", "10.0.0.9", 5432, true)];
        let targets = build_targets(&service(), &plain).unwrap();
        let services = build_services(&service(), &targets, &plain);
        assert!(services[0].annotations.is_empty());
    }

    #[test]
    fn test_build_is_idempotent() {
        let members = vec![
            member("u1", "10.0.0.1", 80, true),
            member("u1", "10.0.0.1", 80, false),
            member("u2", "10.0.0.2", 80, true),
        ];
        let first = build_targets(&service(), &members).unwrap();
        let second = build_targets(&service(), &members).unwrap();
        assert_eq!(first, second);

        // Duplicate uuid merged, ready wins.
        let subsets = &first[0].endpoints.subsets;
        assert_eq!(subsets.len(), 2);
        assert_eq!(subsets[0].addresses.len(), 1);
        assert!(subsets[0].not_ready_addresses.is_empty());
    }

    #[test]
    fn test_promote_demote_remove() {
        let members = vec![member("u1", "10.0.0.1", 80, true), member("u2", "10.0.0.2", 80, true)];
        let mut ep = build_targets(&service(), &members).unwrap().remove(0).endpoints;

        assert!(demote(&mut ep, "u1", "10.0.0.1"));
        assert!(ep.subsets[0].addresses.is_empty());
        assert_eq!(ep.subsets[0].not_ready_addresses[0].ip, "10.0.0.1");

        assert!(promote(&mut ep, "u1", "10.0.0.1"));
        assert_eq!(ep.subsets[0].addresses[0].ip, "10.0.0.1");
        assert!(ep.subsets[0].not_ready_addresses.is_empty());

        assert!(remove(&mut ep, "u1", "10.0.0.1"));
        assert_eq!(ep.subsets.len(), 1);
        assert!(!promote(&mut ep, "u1", "10.0.0.1"));
        assert!(!demote(&mut ep, "missing", "10.0.0.1"));
    }
}
