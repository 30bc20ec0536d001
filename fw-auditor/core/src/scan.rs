//! Scans the rules that apply to the current node.

use crate::{
    dispatch::Handler,
    event::Event,
    history::{HistoryKey, HistoryScan, HistoryStore, ScanStatus},
    metrics::AuditMetrics,
    node::{Node, NodeDirectory, NodeIdentity},
    probe::{Outcome, Probes, Strategy},
    rule::{Rule, RuleId, RuleSource},
};
use anyhow::{anyhow, Context, Result};
use chrono::offset::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};


pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 64;

/// Resolves the rules that apply to this node and probes their destinations.
#[derive(Clone)]
pub struct Scanner {
    identity: Arc<dyn NodeIdentity>,
    nodes: Arc<dyn NodeDirectory>,
    rules: Arc<dyn RuleSource>,
    history: Arc<dyn HistoryStore>,
    probes: Probes,
    permits: Arc<Semaphore>,
    metrics: AuditMetrics,
}

/// The probes spawned by a single scan.
///
/// Dropping a batch doesn't cancel its probes; their outcomes are still
/// recorded.
#[derive(Debug)]
pub struct ScanBatch {
    probes: usize,
    rx: mpsc::UnboundedReceiver<ProbeReport>,
}

/// The outcome of a single probe in a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeReport {
    pub key: HistoryKey,
    pub status: ScanStatus,

    /// False when the outcome couldn't be written to the history store.
    pub recorded: bool,
}

/// A single destination of a rule.
struct Target {
    rule_id: RuleId,
    address: String,
    port: Option<String>,
    strategy: Strategy,
}

// === impl Scanner ===

impl Scanner {
    pub fn new(
        identity: Arc<dyn NodeIdentity>,
        nodes: Arc<dyn NodeDirectory>,
        rules: Arc<dyn RuleSource>,
        history: Arc<dyn HistoryStore>,
        probes: Probes,
    ) -> Self {
        Self {
            identity,
            nodes,
            rules,
            history,
            probes,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_PROBES)),
            metrics: AuditMetrics::default(),
        }
    }

    /// Bounds the number of probes in flight across all batches.
    pub fn with_max_concurrent_probes(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn with_metrics(mut self, metrics: AuditMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Scans every active rule that applies to the current node.
    pub async fn scan_all(&self) -> Result<ScanBatch> {
        let (node, roles) = self.resolve_node().await?;
        let rules = self
            .rules
            .active_rules_by_roles(&roles)
            .await
            .context("failed to look up rules")?;
        debug!(node = %node.name, ?roles, rules = rules.len(), "Scanning all rules");
        Ok(self.scan_rules(&node, rules))
    }

    /// Scans the rules in `ids` that apply to the current node. Ids that
    /// don't match the node's roles are ignored.
    pub async fn scan_by_rule_ids(&self, ids: &[RuleId]) -> Result<ScanBatch> {
        let (node, roles) = self.resolve_node().await?;
        let rules = self
            .rules
            .active_rules_by_ids_and_roles(ids, &roles)
            .await
            .context("failed to look up rules")?;
        debug!(
            node = %node.name,
            ?roles,
            requested = ids.len(),
            rules = rules.len(),
            "Scanning rules by id"
        );
        Ok(self.scan_rules(&node, rules))
    }

    /// Spawns a probe for each destination of each active rule and returns
    /// without waiting for them.
    pub fn scan_rules(&self, node: &Node, rules: Vec<Rule>) -> ScanBatch {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut probes = 0;
        for rule in &rules {
            for target in self.targets(rule) {
                let span = info_span!(
                    "probe",
                    rule = %target.rule_id,
                    dst = %target.address,
                    port = target.port.as_deref().unwrap_or("-"),
                );
                let scan = HistoryScan::pending(
                    rule,
                    node,
                    target.address.clone(),
                    target.port.clone(),
                );
                tokio::spawn(
                    self.clone()
                        .probe(target, scan, tx.clone())
                        .instrument(span),
                );
                probes += 1;
            }
        }
        ScanBatch { probes, rx }
    }

    async fn resolve_node(&self) -> Result<(Node, Vec<String>)> {
        let id = self
            .identity
            .current_node_id()
            .await
            .context("failed to resolve the current node")?;
        let node = self
            .nodes
            .get_node(&id)
            .await
            .with_context(|| format!("failed to look up node {id}"))?
            .ok_or_else(|| anyhow!("node {id} is not known"))?;
        let roles = self
            .nodes
            .roles_for_node(&id)
            .await
            .with_context(|| format!("failed to look up roles for node {id}"))?;
        Ok((node, roles))
    }

    fn targets(&self, rule: &Rule) -> Vec<Target> {
        if !rule.is_active {
            debug!(rule = %rule.id, "Skipping inactive rule");
            return vec![];
        }

        let strategy = self.probes.strategy(rule);
        let target = |address: &String, port: Option<&String>| Target {
            rule_id: rule.id.clone(),
            address: address.clone(),
            port: port.cloned(),
            strategy: strategy.clone(),
        };

        if rule.is_through_proxy {
            return rule
                .destination_addresses
                .iter()
                .map(|address| target(address, None))
                .collect();
        }

        rule.destination_addresses
            .iter()
            .flat_map(|address| {
                rule.destination_ports
                    .iter()
                    .map(move |port| target(address, Some(port)))
            })
            .collect()
    }

    async fn probe(
        self,
        target: Target,
        mut scan: HistoryScan,
        tx: mpsc::UnboundedSender<ProbeReport>,
    ) {
        // The permit bounds history writes as well as probes.
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            return;
        };

        let key = scan.key();
        self.record_pending(&scan).await;

        let outcome = target
            .strategy
            .probe(&target.address, target.port.as_deref())
            .await;
        let status = outcome.status();
        self.metrics.probe_completed(target.strategy.name(), status);
        match &outcome {
            Outcome::Success => debug!("Reachable"),
            Outcome::Error(error) => info!(%error, "Unreachable"),
        }

        scan.status = status;
        scan.error_message = outcome.into_error_message();
        scan.updated_at = Utc::now();
        let recorded = self.record(scan).await;

        let _ = tx.send(ProbeReport {
            key,
            status,
            recorded,
        });
    }

    /// Writes a pending row for keys that have never been probed so that
    /// in-flight probes are visible.
    async fn record_pending(&self, scan: &HistoryScan) {
        match self.history.exists(&scan.key()).await {
            Ok(true) => {}
            Ok(false) => {
                self.record(scan.clone()).await;
            }
            Err(error) => {
                warn!(error = %format_args!("{error:#}"), "Failed to read scan history");
            }
        }
    }

    async fn record(&self, scan: HistoryScan) -> bool {
        let status = scan.status;
        match self.history.upsert(scan).await {
            Ok(()) => true,
            Err(error) => {
                self.metrics.history_write_failed();
                warn!(%status, error = %format_args!("{error:#}"), "Failed to record scan");
                false
            }
        }
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("probes", &self.probes)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Handler for Scanner {
    async fn handle(&self, event: Event) -> Result<()> {
        let batch = match event {
            Event::TriggerAll => self.scan_all().await?,
            Event::TriggerByRuleIds(ids) => self.scan_by_rule_ids(&ids).await?,
            Event::Other { event_type, .. } => {
                debug!(%event_type, "Ignoring event");
                return Ok(());
            }
        };
        info!(probes = batch.len(), "Started scan");
        Ok(())
    }
}

// === impl ScanBatch ===

impl ScanBatch {
    /// The number of probes spawned.
    pub fn len(&self) -> usize {
        self.probes
    }

    pub fn is_empty(&self) -> bool {
        self.probes == 0
    }

    /// Waits for every probe in the batch to complete.
    pub async fn finished(mut self) -> Vec<ProbeReport> {
        let mut reports = Vec::with_capacity(self.probes);
        while let Some(report) = self.rx.recv().await {
            reports.push(report);
        }
        reports
    }
}
