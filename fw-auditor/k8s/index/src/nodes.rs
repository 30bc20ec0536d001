use ahash::AHashMap as HashMap;
use chrono::offset::Utc;
use fw_auditor_core::{Node, NodeAddress, NodeId};
use fw_auditor_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds the cluster's nodes, keyed by UID.
///
/// Nodes are never removed: history rows continue to refer to nodes that have
/// left the cluster.
#[derive(Debug, Default)]
pub struct Index {
    nodes: HashMap<NodeId, Node>,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn roles(&self, id: &NodeId) -> Option<Vec<String>> {
        self.nodes.get(id).map(Node::role_list)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Records a node, returning true if it was not previously known.
    ///
    /// A known node's name, roles and addresses are overwritten; its creation
    /// time is kept.
    pub fn apply(&mut self, mut node: Node) -> bool {
        match self.nodes.get_mut(&node.id) {
            Some(known) => {
                node.created_at = known.created_at;
                node.updated_at = Utc::now();
                *known = node;
                false
            }
            None => {
                debug!(id = %node.id, name = %node.name, "Node added");
                self.nodes.insert(node.id.clone(), node);
                true
            }
        }
    }
}

/// Converts a Kubernetes node into the auditor's model. Nodes without a UID
/// can't be tracked and are ignored.
pub fn mk_node(node: &k8s::Node) -> Option<Node> {
    let uid = node.uid().filter(|uid| !uid.is_empty())?;
    let roles = k8s::node::roles(node.labels()).map(str::to_string).collect();
    let address = |t: &str| k8s::node::address(node, t).map(str::to_string);
    let now = Utc::now();
    Some(Node {
        id: NodeId(uid),
        name: node.name_any(),
        roles,
        address: NodeAddress {
            internal_ip: address("InternalIP"),
            external_ip: address("ExternalIP"),
            hostname: address("Hostname"),
        },
        created_at: now,
        updated_at: now,
    })
}
