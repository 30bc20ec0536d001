use crate::{
    core::{NodeId, NodeIdentity},
    k8s::{self, Api, Client, ResourceExt},
};
use anyhow::{Context, Result};
use tokio::sync::OnceCell;
use tracing::info;

/// Resolves the node this process runs on from its own pod.
///
/// The pod's `spec.nodeName` names the node, whose UID is the identity. The
/// result is cached for the life of the process.
pub struct PodNodeIdentity {
    client: Client,
    namespace: String,
    pod_name: String,
    node_id: OnceCell<NodeId>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("pod {namespace}/{name} is not scheduled to a node")]
    Unscheduled { namespace: String, name: String },

    #[error("node {0} has no UID")]
    MissingUid(String),
}

// === impl PodNodeIdentity ===

impl PodNodeIdentity {
    pub fn new(client: Client, namespace: String, pod_name: String) -> Self {
        Self {
            client,
            namespace,
            pod_name,
            node_id: OnceCell::new(),
        }
    }

    async fn resolve(&self) -> Result<NodeId> {
        let pods = Api::<k8s::Pod>::namespaced(self.client.clone(), &self.namespace);
        let pod = pods
            .get(&self.pod_name)
            .await
            .with_context(|| format!("failed to get pod {}/{}", self.namespace, self.pod_name))?;
        let node_name = pod
            .spec
            .and_then(|spec| spec.node_name)
            .ok_or_else(|| IdentityError::Unscheduled {
                namespace: self.namespace.clone(),
                name: self.pod_name.clone(),
            })?;

        let node = Api::<k8s::Node>::all(self.client.clone())
            .get(&node_name)
            .await
            .with_context(|| format!("failed to get node {node_name}"))?;
        let uid = node
            .uid()
            .filter(|uid| !uid.is_empty())
            .ok_or(IdentityError::MissingUid(node_name.clone()))?;

        info!(node = %node_name, %uid, "Resolved current node");
        Ok(NodeId(uid))
    }
}

#[async_trait::async_trait]
impl NodeIdentity for PodNodeIdentity {
    async fn current_node_id(&self) -> Result<NodeId> {
        self.node_id
            .get_or_try_init(|| self.resolve())
            .await
            .cloned()
    }
}
