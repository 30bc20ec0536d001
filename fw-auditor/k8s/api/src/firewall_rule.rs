/// Declares that nodes carrying any of `roles` must be able to reach each of
/// the destinations.
#[derive(
    Clone,
    Debug,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "audit.fw.io",
    version = "v1alpha1",
    kind = "FirewallRule",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRuleSpec {
    /// Inactive rules are never scanned.
    #[serde(default = "active_default")]
    pub active: bool,

    pub roles: Vec<String>,

    /// Hostnames, IP addresses or URLs.
    pub destination_addresses: Vec<String>,

    /// Port specifiers: `443`, `tcp/22` or `udp/53`. Ignored when the rule is
    /// routed through the forward proxy.
    #[serde(default)]
    pub destination_ports: Vec<String>,

    #[serde(default)]
    pub through_proxy: bool,

    pub description: Option<String>,

    #[serde(default)]
    pub change_requests: Vec<u32>,

    #[serde(default)]
    pub projects: Vec<String>,
}

fn active_default() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let spec = serde_json::from_value::<FirewallRuleSpec>(serde_json::json!({
            "roles": ["web"],
            "destinationAddresses": ["https://example.com"],
        }))
        .unwrap();
        assert!(spec.active);
        assert!(!spec.through_proxy);
        assert!(spec.destination_ports.is_empty());
        assert!(spec.change_requests.is_empty());
    }

    #[test]
    fn camel_case() {
        let spec = serde_json::from_value::<FirewallRuleSpec>(serde_json::json!({
            "active": false,
            "roles": ["db"],
            "destinationAddresses": ["10.1.2.3"],
            "destinationPorts": ["tcp/5432", "udp/53"],
            "throughProxy": true,
            "description": "database egress",
            "changeRequests": [1024],
            "projects": ["billing"],
        }))
        .unwrap();
        assert!(!spec.active);
        assert!(spec.through_proxy);
        assert_eq!(spec.destination_ports, vec!["tcp/5432", "udp/53"]);
        assert_eq!(spec.change_requests, vec![1024]);
        assert_eq!(spec.description.as_deref(), Some("database egress"));
    }
}
