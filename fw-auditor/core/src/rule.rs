use anyhow::Result;
use chrono::{offset::Utc, DateTime};
use serde::Serialize;
use std::{collections::BTreeSet, fmt};

/// Identifies a rule.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

/// A reachability policy: nodes carrying any of `roles` must be able to reach
/// every destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub destination_addresses: Vec<String>,

    /// Raw port specifiers. Ignored when the rule is routed through a proxy.
    pub destination_ports: Vec<String>,
    pub is_through_proxy: bool,
    pub metadata: RuleMetadata,

    /// Advanced each time the rule's history is discarded. Outcomes of probes
    /// started under an older generation are not recorded.
    pub generation: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Operator bookkeeping that has no effect on how a rule is probed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleMetadata {
    pub description: Option<String>,
    pub change_requests: Vec<u32>,
    pub projects: Vec<String>,
}

/// Looks up the rules that apply to a set of node roles.
#[async_trait::async_trait]
pub trait RuleSource: Send + Sync {
    /// Returns all active rules with at least one role in `roles`.
    async fn active_rules_by_roles(&self, roles: &[String]) -> Result<Vec<Rule>>;

    /// Returns the active rules in `ids` with at least one role in `roles`.
    async fn active_rules_by_ids_and_roles(
        &self,
        ids: &[RuleId],
        roles: &[String],
    ) -> Result<Vec<Rule>>;
}

// === impl RuleId ===

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// === impl Rule ===

impl Rule {
    pub fn matches_roles(&self, roles: &[String]) -> bool {
        self.roles.iter().any(|r| roles.contains(r))
    }

    /// Indicates whether `other` would probe a different set of destinations
    /// from a different set of nodes.
    ///
    /// History recorded for one shape must not be attributed to another, so a
    /// shape change invalidates the rule's history. List order is irrelevant.
    pub fn shape_differs(&self, other: &Rule) -> bool {
        fn set(items: &[String]) -> BTreeSet<&str> {
            items.iter().map(String::as_str).collect()
        }

        self.is_through_proxy != other.is_through_proxy
            || set(&self.roles) != set(&other.roles)
            || set(&self.destination_addresses) != set(&other.destination_addresses)
            || set(&self.destination_ports) != set(&other.destination_ports)
    }
}
