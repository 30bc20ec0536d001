use std::collections::BTreeMap;

/// Nodes are assigned roles with labels of the form
/// `node-role.kubernetes.io/<role>`. The label value is ignored.
pub const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Returns the roles assigned to a node by its labels.
pub fn roles<'l>(labels: &'l BTreeMap<String, String>) -> impl Iterator<Item = &'l str> + 'l {
    labels
        .keys()
        .filter_map(|key| key.strip_prefix(ROLE_LABEL_PREFIX))
        .filter(|role| !role.is_empty())
}

/// Returns the first address of the given type (e.g. `InternalIP`) reported in
/// a node's status.
pub fn address<'n>(node: &'n super::Node, address_type: &str) -> Option<&'n str> {
    node.status
        .as_ref()?
        .addresses
        .iter()
        .flatten()
        .find(|a| a.type_ == address_type)
        .map(|a| a.address.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Node, NodeAddress, NodeStatus};
    use maplit::btreemap;

    #[test]
    fn role_labels() {
        let labels = btreemap! {
            "node-role.kubernetes.io/control-plane".to_string() => "".to_string(),
            "node-role.kubernetes.io/worker".to_string() => "true".to_string(),
            "node-role.kubernetes.io/".to_string() => "".to_string(),
            "kubernetes.io/hostname".to_string() => "node-a".to_string(),
        };
        assert_eq!(
            roles(&labels).collect::<Vec<_>>(),
            vec!["control-plane", "worker"]
        );
    }

    #[test]
    fn status_addresses() {
        let node = Node {
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: "10.0.0.1".to_string(),
                    },
                    NodeAddress {
                        type_: "Hostname".to_string(),
                        address: "node-a".to_string(),
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(address(&node, "InternalIP"), Some("10.0.0.1"));
        assert_eq!(address(&node, "Hostname"), Some("node-a"));
        assert_eq!(address(&node, "ExternalIP"), None);
        assert_eq!(address(&Node::default(), "InternalIP"), None);
    }
}
