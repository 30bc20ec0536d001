use ahash::{AHashMap as HashMap, RandomState};
use anyhow::Result;
use fw_auditor_core::{HistoryKey, HistoryScan, HistoryStore, RuleId};
use parking_lot::{Mutex, RwLock};
use std::{hash::BuildHasher, sync::Arc};
use tracing::debug;

const SHARDS: usize = 32;

/// Scan history, sharded by key so that writes for different keys rarely
/// contend.
///
/// Each rule has a generation that advances whenever its rows are
/// discarded. Writes carrying an older generation are dropped, so scans that
/// were in flight when a rule changed cannot bring its old rows back.
#[derive(Clone, Debug)]
pub struct HistoryIndex(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    hasher: RandomState,
    shards: Box<[Mutex<HashMap<HistoryKey, HistoryScan>>]>,
    generations: RwLock<HashMap<RuleId, u64>>,
}

// === impl HistoryIndex ===

impl Default for HistoryIndex {
    fn default() -> Self {
        Self::with_shards(SHARDS)
    }
}

impl HistoryIndex {
    pub fn with_shards(n: usize) -> Self {
        let shards = (0..n.max(1)).map(|_| Mutex::default()).collect();
        Self(Arc::new(Inner {
            hasher: RandomState::new(),
            shards,
            generations: RwLock::default(),
        }))
    }

    fn shard(&self, key: &HistoryKey) -> &Mutex<HashMap<HistoryKey, HistoryScan>> {
        let i = BuildHasher::hash_one(&self.0.hasher, key) as usize % self.0.shards.len();
        &self.0.shards[i]
    }

    pub fn get(&self, key: &HistoryKey) -> Option<HistoryScan> {
        self.shard(key).lock().get(key).cloned()
    }

    /// Returns all rows recorded for a rule, ordered by destination.
    pub fn by_rule(&self, rule_id: &RuleId) -> Vec<HistoryScan> {
        self.collect(|scan| scan.rule_id == *rule_id)
    }

    /// Returns every recorded row, ordered by rule and destination.
    pub fn all(&self) -> Vec<HistoryScan> {
        self.collect(|_| true)
    }

    fn collect(&self, filter: impl Fn(&HistoryScan) -> bool) -> Vec<HistoryScan> {
        let mut rows = self
            .0
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|&scan| filter(scan))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| {
            (&a.rule_id, &a.node_id, &a.destination_address, &a.destination_port).cmp(&(
                &b.rule_id,
                &b.node_id,
                &b.destination_address,
                &b.destination_port,
            ))
        });
        rows
    }

    /// The generation that new scans of this rule must carry.
    pub fn generation(&self, rule_id: &RuleId) -> u64 {
        self.0
            .generations
            .read()
            .get(rule_id)
            .copied()
            .unwrap_or_default()
    }

    /// Discards all rows recorded for a rule, returning the number removed.
    ///
    /// The rule's generation is advanced before any row is removed; scans
    /// started earlier are no longer recorded.
    pub fn clear_rule(&self, rule_id: &RuleId) -> usize {
        *self
            .0
            .generations
            .write()
            .entry(rule_id.clone())
            .or_default() += 1;

        self.0
            .shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock();
                let before = shard.len();
                shard.retain(|key, _| key.rule_id != *rule_id);
                before - shard.len()
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.0.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn upsert_sync(&self, scan: HistoryScan) {
        let key = scan.key();
        let mut shard = self.shard(&key).lock();
        // Checked under the shard lock so a concurrent clear either sees
        // this row or this write sees the new generation.
        let current = self.generation(&key.rule_id);
        if scan.generation < current {
            debug!(
                rule = %key.rule_id,
                address = %key.destination_address,
                generation = scan.generation,
                current,
                "Dropping outcome for a superseded rule"
            );
            return;
        }
        match shard.get_mut(&key) {
            Some(row) => {
                row.generation = scan.generation;
                row.status = scan.status;
                row.error_message = scan.error_message;
                row.updated_at = scan.updated_at;
            }
            None => {
                shard.insert(key, scan);
            }
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for HistoryIndex {
    async fn exists(&self, key: &HistoryKey) -> Result<bool> {
        Ok(self.shard(key).lock().contains_key(key))
    }

    async fn upsert(&self, scan: HistoryScan) -> Result<()> {
        self.upsert_sync(scan);
        Ok(())
    }
}
