#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod dispatch;
pub mod event;
pub mod history;
mod metrics;
pub mod node;
pub mod port;
pub mod probe;
pub mod rule;
pub mod scan;
pub mod trigger;

pub use self::{
    dispatch::{DispatchTable, Handler},
    event::{Event, EventType},
    history::{HistoryKey, HistoryScan, HistoryStore, ScanStatus},
    metrics::AuditMetrics,
    node::{Node, NodeAddress, NodeDirectory, NodeId, NodeIdentity},
    rule::{Rule, RuleId, RuleMetadata, RuleSource},
    scan::{ProbeReport, ScanBatch, Scanner},
    trigger::{Publisher, Trigger, TOPIC},
};
