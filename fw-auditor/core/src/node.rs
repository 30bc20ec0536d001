use anyhow::Result;
use chrono::{offset::Utc, DateTime};
use serde::Serialize;
use std::{collections::BTreeSet, fmt};

/// The cluster-assigned identity of a node.
///
/// Node names may be reused as machines come and go; the UID is not.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub roles: BTreeSet<String>,
    pub address: NodeAddress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddress {
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub hostname: Option<String>,
}

/// Resolves the node this process is running on.
#[async_trait::async_trait]
pub trait NodeIdentity: Send + Sync {
    async fn current_node_id(&self) -> Result<NodeId>;
}

/// Looks up known cluster nodes.
#[async_trait::async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>>;

    async fn roles_for_node(&self, id: &NodeId) -> Result<Vec<String>>;
}

// === impl NodeId ===

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// === impl Node ===

impl Node {
    pub fn role_list(&self) -> Vec<String> {
        self.roles.iter().cloned().collect()
    }
}
