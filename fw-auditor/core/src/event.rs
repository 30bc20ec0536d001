//! Trigger events and their wire envelope.
//!
//! On the wire a trigger is `{"event_type": "...", "data": ...}`. The payload
//! is decoded once, here, into a typed [`Event`].

use crate::rule::RuleId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub(crate) const TRIGGER_ALL: &str = "trigger_all";
pub(crate) const TRIGGER_BY_RULE_IDS: &str = "trigger_by_rule_ids";

/// The discriminator used to route events to handlers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    TriggerAll,
    TriggerByRuleIds,
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Envelope", try_from = "Envelope")]
pub enum Event {
    /// Scan every rule that applies to the receiving node.
    TriggerAll,

    /// Scan the listed rules, where they apply to the receiving node.
    TriggerByRuleIds(Vec<RuleId>),

    /// An event this consumer doesn't know about. Kept so that newer
    /// producers don't break older consumers.
    Other { event_type: String, data: Value },
}

#[derive(Debug, Error)]
#[error("invalid {event_type} payload: expected a list of rule ids")]
pub struct PayloadError {
    event_type: &'static str,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    event_type: String,
    #[serde(default)]
    data: Value,
}

// === impl EventType ===

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TriggerAll => TRIGGER_ALL,
            Self::TriggerByRuleIds => TRIGGER_BY_RULE_IDS,
            Self::Other(t) => t,
        }
    }
}

impl From<&str> for EventType {
    fn from(t: &str) -> Self {
        match t {
            TRIGGER_ALL => Self::TriggerAll,
            TRIGGER_BY_RULE_IDS => Self::TriggerByRuleIds,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Event ===

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TriggerAll => EventType::TriggerAll,
            Self::TriggerByRuleIds(_) => EventType::TriggerByRuleIds,
            Self::Other { event_type, .. } => EventType::from(event_type.as_str()),
        }
    }

    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl From<Event> for Envelope {
    fn from(event: Event) -> Self {
        match event {
            Event::TriggerAll => Envelope {
                event_type: TRIGGER_ALL.to_string(),
                data: Value::Null,
            },
            Event::TriggerByRuleIds(ids) => Envelope {
                event_type: TRIGGER_BY_RULE_IDS.to_string(),
                data: ids.into_iter().map(|RuleId(id)| Value::String(id)).collect(),
            },
            Event::Other { event_type, data } => Envelope { event_type, data },
        }
    }
}

impl TryFrom<Envelope> for Event {
    type Error = PayloadError;

    fn try_from(Envelope { event_type, data }: Envelope) -> Result<Self, Self::Error> {
        match event_type.as_str() {
            // Older producers send an empty list rather than null.
            TRIGGER_ALL => Ok(Event::TriggerAll),
            TRIGGER_BY_RULE_IDS => {
                let ids = match data {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(id) => Ok(RuleId(id)),
                            _ => Err(PayloadError {
                                event_type: TRIGGER_BY_RULE_IDS,
                            }),
                        })
                        .collect::<Result<_, _>>()?,
                    _ => {
                        return Err(PayloadError {
                            event_type: TRIGGER_BY_RULE_IDS,
                        })
                    }
                };
                Ok(Event::TriggerByRuleIds(ids))
            }
            _ => Ok(Event::Other { event_type, data }),
        }
    }
}
