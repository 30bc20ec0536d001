use crate::{
    node::{Node, NodeAddress, NodeId},
    rule::{Rule, RuleId},
};
use anyhow::Result;
use chrono::{offset::Utc, DateTime};
use serde::Serialize;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Success,
    Error,
    Pending,
}

/// Identifies a single history row.
///
/// Proxy-routed rules are probed per address only, so their rows carry no
/// port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub rule_id: RuleId,
    pub node_id: NodeId,
    pub destination_address: String,
    pub destination_port: Option<String>,
}

/// The latest probe outcome for one (rule, node, destination) key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryScan {
    pub rule_id: RuleId,
    pub node_id: NodeId,
    pub node_name: String,
    pub node_address: NodeAddress,
    pub destination_address: String,
    pub destination_port: Option<String>,
    pub is_through_proxy: bool,

    /// The rule generation the probe was started under.
    #[serde(skip)]
    pub generation: u64,
    pub status: ScanStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stores deduplicated scan history.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn exists(&self, key: &HistoryKey) -> Result<bool>;

    /// Inserts `scan` if its key is unknown. Otherwise only the status, error
    /// message and update time of the existing row are overwritten.
    ///
    /// Scans started under an older generation of their rule are discarded.
    async fn upsert(&self, scan: HistoryScan) -> Result<()>;
}

// === impl ScanStatus ===

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl HistoryKey ===

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}->{}",
            self.rule_id, self.node_id, self.destination_address
        )?;
        if let Some(port) = &self.destination_port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

// === impl HistoryScan ===

impl HistoryScan {
    /// Starts a pending row for a probe of `rule` from `node`.
    pub fn pending(
        rule: &Rule,
        node: &Node,
        destination_address: String,
        destination_port: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            rule_id: rule.id.clone(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_address: node.address.clone(),
            destination_address,
            destination_port,
            is_through_proxy: rule.is_through_proxy,
            generation: rule.generation,
            status: ScanStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> HistoryKey {
        HistoryKey {
            rule_id: self.rule_id.clone(),
            node_id: self.node_id.clone(),
            destination_address: self.destination_address.clone(),
            destination_port: self.destination_port.clone(),
        }
    }
}
