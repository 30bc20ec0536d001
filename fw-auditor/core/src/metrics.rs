use crate::{event::EventType, history::ScanStatus};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct AuditMetrics {
    probes: Family<ProbeLabels, Counter>,
    history_write_errors: Counter,
    triggers: Family<TriggerLabels, Counter>,
    malformed_triggers: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ProbeLabels {
    strategy: &'static str,
    status: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TriggerLabels {
    event_type: &'static str,
}

// === impl AuditMetrics ===

impl AuditMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let probes = Family::<ProbeLabels, Counter>::default();
        reg.register(
            "probes",
            "Total number of completed reachability probes",
            probes.clone(),
        );

        let history_write_errors = Counter::default();
        reg.register(
            "history_write_errors",
            "Total number of probe outcomes that could not be recorded",
            history_write_errors.clone(),
        );

        let triggers = Family::<TriggerLabels, Counter>::default();
        reg.register(
            "triggers",
            "Total number of trigger events received",
            triggers.clone(),
        );

        let malformed_triggers = Counter::default();
        reg.register(
            "malformed_triggers",
            "Total number of trigger messages that could not be decoded",
            malformed_triggers.clone(),
        );

        Self {
            probes,
            history_write_errors,
            triggers,
            malformed_triggers,
        }
    }

    pub(crate) fn probe_completed(&self, strategy: &'static str, status: ScanStatus) {
        self.probes
            .get_or_create(&ProbeLabels {
                strategy,
                status: status.as_str(),
            })
            .inc();
    }

    pub(crate) fn history_write_failed(&self) {
        self.history_write_errors.inc();
    }

    /// Unrecognized event types share a single `other` series.
    pub(crate) fn trigger_received(&self, event_type: &EventType) {
        let event_type = match event_type {
            EventType::TriggerAll => crate::event::TRIGGER_ALL,
            EventType::TriggerByRuleIds => crate::event::TRIGGER_BY_RULE_IDS,
            EventType::Other(_) => "other",
        };
        self.triggers
            .get_or_create(&TriggerLabels { event_type })
            .inc();
    }

    pub(crate) fn trigger_malformed(&self) {
        self.malformed_triggers.inc();
    }
}
