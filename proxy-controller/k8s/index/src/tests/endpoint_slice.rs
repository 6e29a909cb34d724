use super::*;
use crate::SliceIndex;
use kpng_proxy_controller_core::api::{EndpointConditions, IpSet, PortName};
use kpng_proxy_controller_k8s_api::{
    api::discovery::v1::{self as discovery, EndpointPort},
    EndpointSlice,
};
use kubert::index::{IndexClusterResource, IndexNamespacedResource};

fn mk_slice(
    ns: &str,
    name: &str,
    service: Option<&str>,
    endpoints: Vec<discovery::Endpoint>,
) -> EndpointSlice {
    let service_label = service
        .map(|s| vec![(labels::SERVICE_NAME, s)])
        .unwrap_or_default();
    EndpointSlice {
        metadata: mk_meta(Some(ns), name, &service_label),
        address_type: "IPv4".to_string(),
        endpoints,
        ports: Some(vec![EndpointPort {
            name: Some("http".to_string()),
            port: Some(8080),
            ..Default::default()
        }]),
    }
}

fn mk_endpoint(ip: &str, node: &str, pod: &str, ready: Option<bool>) -> discovery::Endpoint {
    discovery::Endpoint {
        addresses: vec![ip.to_string()],
        conditions: Some(discovery::EndpointConditions {
            ready,
            ..Default::default()
        }),
        node_name: Some(node.to_string()),
        target_ref: Some(mk_pod_ref(pod)),
        ..Default::default()
    }
}

#[test]
fn projects_slices() {
    let test = TestConfig::default();
    let mut nodes = test.nodes();
    let mut slices = SliceIndex::new(test.store.clone());

    nodes.apply(mk_node("node-a", "z1"));

    let mut zoned = mk_endpoint("10.0.0.2", "node-b", "pod-2", Some(false));
    zoned.zone = Some("z2".to_string());
    zoned.hostname = Some("pod-2".to_string());
    zoned.hints = Some(discovery::EndpointHints {
        for_zones: Some(vec![
            discovery::ForZone {
                name: "z2".to_string(),
            },
            discovery::ForZone {
                name: "z1".to_string(),
            },
        ]),
        ..Default::default()
    });
    let mut invalid = mk_endpoint("10.0.0.3", "node-c", "pod-3", None);
    invalid.addresses.push("not-an-ip".to_string());

    slices.apply(mk_slice(
        "ns-0",
        "web-abcde",
        Some("web"),
        vec![
            mk_endpoint("10.0.0.1", "node-a", "pod-1", Some(true)),
            zoned,
            invalid,
        ],
    ));

    let endpoints = test.endpoints_of("ns-0", "web");
    assert_eq!(endpoints.len(), 3);

    let a = &endpoints[0];
    assert_eq!(a.source_name, "web-abcde");
    assert_eq!(a.pod_name, "pod-1");
    assert_eq!(
        a.topology,
        topology(&[(labels::HOSTNAME, "node-a"), (labels::ZONE, "z1")]),
        "topology comes from the stored node"
    );
    assert_eq!(
        a.conditions,
        Some(EndpointConditions {
            ready: true,
            serving: true,
            terminating: false,
        })
    );
    let ep = a.endpoint.as_ref().unwrap();
    assert_eq!(ep.ips, Some(IpSet::from_iter(["10.0.0.1"])));
    assert_eq!(
        ep.port_overrides,
        vec![PortName {
            name: "http".to_string(),
            port: 8080,
        }]
    );

    let b = &endpoints[1];
    assert_eq!(
        b.topology,
        topology(&[(labels::HOSTNAME, "node-b"), (labels::ZONE, "z2")])
    );
    assert!(!b.is_ready());
    assert_eq!(b.endpoint.as_ref().unwrap().hostname, "pod-2");
    assert_eq!(b.hint_zones, vec!["z1", "z2"]);
    assert!(a.hint_zones.is_empty());

    let c = &endpoints[2];
    assert!(!c.is_ready(), "unknown readiness is not ready");
    assert_eq!(
        c.endpoint.as_ref().unwrap().ips,
        Some(IpSet::from_iter(["10.0.0.3"]))
    );
}

#[test]
fn slices_reconcile_their_endpoints() {
    let test = TestConfig::default();
    let mut slices = SliceIndex::new(test.store.clone());

    slices.apply(mk_slice(
        "ns-0",
        "web-1",
        Some("web"),
        vec![
            mk_endpoint("10.0.0.1", "node-a", "pod-1", Some(true)),
            mk_endpoint("10.0.0.2", "node-b", "pod-2", Some(true)),
        ],
    ));
    slices.apply(mk_slice(
        "ns-0",
        "web-2",
        Some("web"),
        vec![mk_endpoint("10.0.0.3", "node-c", "pod-3", Some(true))],
    ));
    assert_eq!(test.endpoints_of("ns-0", "web").len(), 3);

    slices.apply(mk_slice(
        "ns-0",
        "web-1",
        Some("web"),
        vec![mk_endpoint("10.0.0.1", "node-a", "pod-1", Some(true))],
    ));
    let pods = test
        .endpoints_of("ns-0", "web")
        .into_iter()
        .map(|ei| ei.pod_name)
        .collect::<Vec<_>>();
    assert_eq!(pods, vec!["pod-1", "pod-3"]);

    // A slice that loses its service label no longer contributes endpoints.
    slices.apply(mk_slice(
        "ns-0",
        "web-2",
        None,
        vec![mk_endpoint("10.0.0.3", "node-c", "pod-3", Some(true))],
    ));
    assert_eq!(test.endpoints_of("ns-0", "web").len(), 1);

    slices.delete("ns-0".to_string(), "web-1".to_string());
    assert!(test.endpoints_of("ns-0", "web").is_empty());
    assert_eq!(test.store.read(|tree| tree.count(Set::Endpoints)), 0);
}

#[test]
fn reset_marks_endpoints_synced() {
    let test = TestConfig::default();
    let mut slices = SliceIndex::new(test.store.clone());

    slices.apply(mk_slice(
        "ns-0",
        "old",
        Some("old"),
        vec![mk_endpoint("10.0.0.1", "node-a", "pod-1", Some(true))],
    ));
    assert!(!test.is_synced(Set::Endpoints));

    let mut removed = kubert::index::NamespacedRemoved::default();
    removed
        .entry("ns-0".to_string())
        .or_default()
        .insert("old".to_string());
    slices.reset(
        vec![mk_slice(
            "ns-0",
            "web-1",
            Some("web"),
            vec![mk_endpoint("10.0.0.2", "node-a", "pod-2", Some(true))],
        )],
        removed,
    );

    assert!(test.is_synced(Set::Endpoints));
    assert!(test.endpoints_of("ns-0", "old").is_empty());
    assert_eq!(test.endpoints_of("ns-0", "web").len(), 1);
}
