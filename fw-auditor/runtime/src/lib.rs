#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use fw_auditor_core as core;
pub use fw_auditor_k8s_api as k8s;
pub use fw_auditor_k8s_index as index;

mod args;
mod history_api;
mod identity;
mod node_sync;
mod pubsub;
mod trigger;

pub use self::{
    args::Args,
    identity::{IdentityError, PodNodeIdentity},
    pubsub::RedisPublisher,
    trigger::TriggerArgs,
};

use crate::core::{Node, NodeDirectory, NodeId, Rule, RuleId, RuleSource};

/// Serves rule lookups from the rule index.
#[derive(Clone, Debug)]
struct RuleLookup(index::rules::SharedIndex);

/// Serves node lookups from the node index.
#[derive(Clone, Debug)]
struct NodeLookup(index::nodes::SharedIndex);

#[async_trait::async_trait]
impl RuleSource for RuleLookup {
    async fn active_rules_by_roles(&self, roles: &[String]) -> anyhow::Result<Vec<Rule>> {
        Ok(self.0.read().active_rules_by_roles(roles))
    }

    async fn active_rules_by_ids_and_roles(
        &self,
        ids: &[RuleId],
        roles: &[String],
    ) -> anyhow::Result<Vec<Rule>> {
        Ok(self.0.read().active_rules_by_ids_and_roles(ids, roles))
    }
}

#[async_trait::async_trait]
impl NodeDirectory for NodeLookup {
    async fn get_node(&self, id: &NodeId) -> anyhow::Result<Option<Node>> {
        Ok(self.0.read().get(id).cloned())
    }

    async fn roles_for_node(&self, id: &NodeId) -> anyhow::Result<Vec<String>> {
        Ok(self.0.read().roles(id).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::NodeAddress,
        index::{nodes, rules, HistoryIndex},
        k8s::{FirewallRule, FirewallRuleSpec, ObjectMeta},
    };
    use kubert::index::IndexNamespacedResource;
    use maplit::btreeset;

    #[tokio::test]
    async fn lookups_read_from_indexes() {
        let rule_index = rules::Index::shared(HistoryIndex::default());
        rule_index.write().apply(FirewallRule {
            metadata: ObjectMeta {
                namespace: Some("prod".to_string()),
                name: Some("allow-dns".to_string()),
                ..Default::default()
            },
            spec: FirewallRuleSpec {
                active: true,
                roles: vec!["worker".to_string()],
                destination_addresses: vec!["10.96.0.10".to_string()],
                destination_ports: vec!["udp/53".to_string()],
                through_proxy: false,
                description: None,
                change_requests: vec![],
                projects: vec![],
            },
        });
        let lookup = RuleLookup(rule_index);
        let worker = vec!["worker".to_string()];
        assert_eq!(lookup.active_rules_by_roles(&worker).await.unwrap().len(), 1);
        assert!(lookup
            .active_rules_by_ids_and_roles(&["prod/other".into()], &worker)
            .await
            .unwrap()
            .is_empty());

        let node_index = nodes::Index::shared();
        let now = chrono::Utc::now();
        node_index.write().apply(Node {
            id: "uid-1".into(),
            name: "node-a".to_string(),
            roles: btreeset! {"worker".to_string()},
            address: NodeAddress::default(),
            created_at: now,
            updated_at: now,
        });
        let lookup = NodeLookup(node_index);
        assert!(lookup.get_node(&"uid-1".into()).await.unwrap().is_some());
        assert_eq!(
            lookup.roles_for_node(&"uid-1".into()).await.unwrap(),
            worker
        );
        assert!(lookup.roles_for_node(&"uid-2".into()).await.unwrap().is_empty());
    }
}
