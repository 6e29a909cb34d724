use super::*;
use crate::ServiceIndex;
use kpng_proxy_controller_core::api::{ClientIpAffinity, IpFilter, IpSet, PortMapping, Protocol};
use kpng_proxy_controller_k8s_api::{
    api::core::v1::{
        ClientIPConfig, LoadBalancerIngress, LoadBalancerStatus, ServiceStatus,
    },
    IntOrString, ServicePort, ServiceSpec, SessionAffinityConfig,
};
use kubert::index::IndexNamespacedResource;
use maplit::btreemap;

fn mk_service(ns: &str, name: &str, spec: ServiceSpec) -> k8s::Service {
    k8s::Service {
        metadata: mk_meta(Some(ns), name, &[("app", name), ("team", "net")]),
        spec: Some(spec),
        ..Default::default()
    }
}

fn stored(test: &TestConfig, ns: &str, name: &str) -> Option<(kpng_proxy_controller_core::api::Service, Vec<String>)> {
    test.store.read(|tree| {
        let si = tree.get_service(ns, name)?;
        Some((si.service.clone()?, si.topology_keys.clone()))
    })
}

#[test]
fn projects_services() {
    let test = TestConfig::from_config(Config {
        service_label_globs: vec!["app".to_string()],
        ..Config::default()
    });
    let mut index = ServiceIndex::new(test.store.clone(), &test.config).unwrap();

    let mut svc = mk_service(
        "ns-0",
        "web",
        ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            cluster_ip: Some("10.96.0.10".to_string()),
            cluster_ips: Some(vec!["10.96.0.10".to_string(), "fd00::10".to_string()]),
            external_ips: Some(vec!["192.0.2.1".to_string(), "bogus".to_string()]),
            load_balancer_source_ranges: Some(vec!["198.51.100.0/24".to_string()]),
            session_affinity: Some("ClientIP".to_string()),
            session_affinity_config: Some(SessionAffinityConfig {
                client_ip: Some(ClientIPConfig {
                    timeout_seconds: Some(60),
                }),
            }),
            external_traffic_policy: Some("Local".to_string()),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    node_port: Some(30080),
                    target_port: Some(IntOrString::Int(8080)),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("dns".to_string()),
                    port: 53,
                    protocol: Some("UDP".to_string()),
                    target_port: Some(IntOrString::String("dns".to_string())),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        },
    );
    svc.status = Some(ServiceStatus {
        load_balancer: Some(LoadBalancerStatus {
            ingress: Some(vec![LoadBalancerIngress {
                ip: Some("203.0.113.7".to_string()),
                ..Default::default()
            }]),
        }),
        ..Default::default()
    });
    svc.metadata.annotations = Some(btreemap! {
        labels::TOPOLOGY_KEYS_ANNOTATION.to_string() => "kubernetes.io/hostname, *".to_string(),
    });
    index.apply(svc);

    let (service, topology_keys) = stored(&test, "ns-0", "web").expect("service must be stored");
    assert_eq!(topology_keys, vec!["kubernetes.io/hostname", "*"]);
    assert_eq!(service.r#type, "LoadBalancer");
    assert_eq!(
        service.labels,
        btreemap! { "app".to_string() => "web".to_string() }
    );
    assert!(service.annotations.is_empty());

    let ips = service.ips.expect("ips must be set");
    assert!(!ips.headless);
    assert_eq!(
        ips.cluster_ips,
        Some(IpSet::from_iter(["10.96.0.10", "fd00::10"]))
    );
    assert_eq!(ips.external_ips, Some(IpSet::from_iter(["192.0.2.1"])));
    assert_eq!(ips.load_balancer_ips, Some(IpSet::from_iter(["203.0.113.7"])));
    assert_eq!(
        service.ip_filters,
        vec![IpFilter {
            target_ips: Some(IpSet::from_iter(["203.0.113.7"])),
            source_ranges: vec!["198.51.100.0/24".to_string()],
        }]
    );
    assert_eq!(service.client_ip, Some(ClientIpAffinity { timeout_seconds: 60 }));
    assert!(service.external_traffic_to_local);
    assert!(!service.internal_traffic_to_local);
    assert_eq!(
        service.ports,
        vec![
            PortMapping {
                name: "http".to_string(),
                protocol: Protocol::Tcp as i32,
                port: 80,
                node_port: 30080,
                target_port: 8080,
                target_port_name: String::new(),
            },
            PortMapping {
                name: "dns".to_string(),
                protocol: Protocol::Udp as i32,
                port: 53,
                node_port: 0,
                target_port: 0,
                target_port_name: "dns".to_string(),
            },
        ]
    );
}

#[test]
fn single_cluster_ip_fallback_and_headless() {
    let test = TestConfig::default();
    let mut index = ServiceIndex::new(test.store.clone(), &test.config).unwrap();

    index.apply(mk_service(
        "ns-0",
        "legacy",
        ServiceSpec {
            cluster_ip: Some("10.96.0.11".to_string()),
            session_affinity: Some("ClientIP".to_string()),
            ..Default::default()
        },
    ));
    index.apply(mk_service(
        "ns-0",
        "headless",
        ServiceSpec {
            cluster_ip: Some("None".to_string()),
            cluster_ips: Some(vec!["None".to_string()]),
            ..Default::default()
        },
    ));

    let (legacy, keys) = stored(&test, "ns-0", "legacy").unwrap();
    assert!(keys.is_empty());
    assert_eq!(legacy.r#type, "ClusterIP");
    let ips = legacy.ips.unwrap();
    assert_eq!(ips.cluster_ips, Some(IpSet::from_iter(["10.96.0.11"])));
    assert_eq!(
        legacy.client_ip,
        Some(ClientIpAffinity {
            timeout_seconds: 10800
        })
    );

    let (headless, _) = stored(&test, "ns-0", "headless").unwrap();
    let ips = headless.ips.unwrap();
    assert!(ips.headless);
    assert_eq!(ips.cluster_ips, Some(IpSet::default()));
}

#[test]
fn delete_and_reset() {
    let test = TestConfig::default();
    let mut index = ServiceIndex::new(test.store.clone(), &test.config).unwrap();

    index.apply(mk_service("ns-0", "a", ServiceSpec::default()));
    index.apply(mk_service("ns-0", "b", ServiceSpec::default()));
    assert!(!test.is_synced(Set::Services));

    index.delete("ns-0".to_string(), "a".to_string());
    assert!(stored(&test, "ns-0", "a").is_none());

    let mut removed = kubert::index::NamespacedRemoved::default();
    removed
        .entry("ns-0".to_string())
        .or_default()
        .insert("b".to_string());
    index.reset(vec![mk_service("ns-1", "c", ServiceSpec::default())], removed);

    assert!(test.is_synced(Set::Services));
    assert!(stored(&test, "ns-0", "b").is_none());
    assert!(stored(&test, "ns-1", "c").is_some());
    assert_eq!(crate::SizedIndex::<k8s::Service>::size(&index, "ns-0"), 0);
    assert_eq!(crate::SizedIndex::<k8s::Service>::size(&index, "ns-1"), 1);

    // Reapplying an identical service does not bump the revision.
    let rev = test.store.rev();
    index.apply(mk_service("ns-1", "c", ServiceSpec::default()));
    assert_eq!(test.store.rev(), rev);
}
