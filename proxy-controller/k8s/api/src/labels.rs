//! Well-known labels and annotations.

/// Names the service an `EndpointSlice` belongs to.
pub const SERVICE_NAME: &str = "kubernetes.io/service-name";

/// Assigns a service to a specific proxy implementation.
pub const SERVICE_PROXY_NAME: &str = "service.kubernetes.io/service-proxy-name";

/// Marks the slices and endpoints of headless services.
pub const HEADLESS: &str = "service.kubernetes.io/headless";

pub const HOSTNAME: &str = "kubernetes.io/hostname";
pub const ZONE: &str = "topology.kubernetes.io/zone";
pub const REGION: &str = "topology.kubernetes.io/region";

/// Comma-separated topology keys of a service, in order of preference.
pub const TOPOLOGY_KEYS_ANNOTATION: &str = "kpng.k8s.io/topology-keys";

/// Builds the label selector of the services handled by a proxy.
///
/// Without a proxy name, only services that are not claimed by any proxy are selected.
/// Headless services are never selected.
pub fn service_selector(proxy_name: Option<&str>) -> String {
    match proxy_name {
        Some(name) if !name.is_empty() => format!("{SERVICE_PROXY_NAME}={name},!{HEADLESS}"),
        _ => format!("!{SERVICE_PROXY_NAME},!{HEADLESS}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_unclaimed_services_by_default() {
        assert_eq!(
            service_selector(None),
            "!service.kubernetes.io/service-proxy-name,!service.kubernetes.io/headless"
        );
        assert_eq!(service_selector(Some("")), service_selector(None));
    }

    #[test]
    fn selects_services_of_a_named_proxy() {
        assert_eq!(
            service_selector(Some("kpng")),
            "service.kubernetes.io/service-proxy-name=kpng,!service.kubernetes.io/headless"
        );
    }
}
