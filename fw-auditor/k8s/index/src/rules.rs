use crate::HistoryIndex;
use ahash::AHashMap as HashMap;
use chrono::offset::Utc;
use fw_auditor_core::{Rule, RuleId, RuleMetadata};
use fw_auditor_k8s_api::{FirewallRule, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds all `FirewallRule` resources, keyed by `<namespace>/<name>`.
#[derive(Debug)]
pub struct Index {
    rules: HashMap<RuleId, Rule>,
    history: HistoryIndex,
}

// === impl Index ===

impl Index {
    pub fn shared(history: HistoryIndex) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            rules: HashMap::default(),
            history,
        }))
    }

    pub fn get(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.get(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the active rules that apply to any of `roles`, ordered by id.
    pub fn active_rules_by_roles(&self, roles: &[String]) -> Vec<Rule> {
        self.select(|rule| rule.matches_roles(roles))
    }

    /// Returns the active rules in `ids` that apply to any of `roles`, ordered
    /// by id.
    pub fn active_rules_by_ids_and_roles(&self, ids: &[RuleId], roles: &[String]) -> Vec<Rule> {
        self.select(|rule| ids.contains(&rule.id) && rule.matches_roles(roles))
    }

    fn select(&self, f: impl Fn(&Rule) -> bool) -> Vec<Rule> {
        let mut rules = self
            .rules
            .values()
            .filter(|rule| rule.is_active && f(rule))
            .cloned()
            .collect::<Vec<_>>();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// Inserts or replaces a rule.
    ///
    /// History recorded against a rule's previous destinations is discarded
    /// when they change. A rule that is reapplied without changes keeps its
    /// `updated_at`.
    pub fn apply_rule(&mut self, mut rule: Rule) {
        let now = Utc::now();
        match self.rules.get(&rule.id) {
            Some(prev) => {
                rule.created_at = prev.created_at;
                rule.updated_at = prev.updated_at;
                rule.generation = prev.generation;
                if rule == *prev {
                    debug!(rule = %rule.id, "Rule unchanged");
                    return;
                }
                rule.updated_at = Some(now);
                if prev.shape_differs(&rule) {
                    let cleared = self.history.clear_rule(&rule.id);
                    rule.generation = self.history.generation(&rule.id);
                    info!(
                        rule = %rule.id,
                        cleared,
                        generation = rule.generation,
                        "Rule destinations changed"
                    );
                } else {
                    debug!(rule = %rule.id, "Rule updated");
                }
            }
            None => {
                rule.created_at = Some(now);
                rule.updated_at = Some(now);
                rule.generation = self.history.generation(&rule.id);
                debug!(rule = %rule.id, "Rule added");
            }
        }
        self.rules.insert(rule.id.clone(), rule);
    }

    pub fn delete_rule(&mut self, id: &RuleId) {
        if self.rules.remove(id).is_some() {
            let cleared = self.history.clear_rule(id);
            info!(rule = %id, cleared, "Rule deleted");
        }
    }
}

impl kubert::index::IndexNamespacedResource<FirewallRule> for Index {
    fn apply(&mut self, resource: FirewallRule) {
        let Some(ns) = resource.namespace() else {
            warn!(name = %resource.name_any(), "FirewallRule has no namespace");
            return;
        };
        let name = resource.name_unchecked();
        let _span = info_span!("apply", %ns, %name).entered();

        self.apply_rule(mk_rule(rule_id(&ns, &name), resource));
    }

    fn delete(&mut self, ns: String, name: String) {
        let _span = info_span!("delete", %ns, %name).entered();
        self.delete_rule(&rule_id(&ns, &name));
    }
}

pub fn rule_id(ns: &str, name: &str) -> RuleId {
    RuleId(format!("{ns}/{name}"))
}

fn mk_rule(id: RuleId, resource: FirewallRule) -> Rule {
    let spec = resource.spec;
    Rule {
        id,
        is_active: spec.active,
        roles: spec.roles,
        destination_addresses: spec.destination_addresses,
        destination_ports: spec.destination_ports,
        is_through_proxy: spec.through_proxy,
        metadata: RuleMetadata {
            description: spec.description,
            change_requests: spec.change_requests,
            projects: spec.projects,
        },
        generation: 0,
        created_at: None,
        updated_at: None,
    }
}
