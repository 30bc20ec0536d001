//! Firewall auditor indexes
//!
//! The auditor keeps three indexes in memory:
//!
//! - [`rules`] holds the `FirewallRule` resources, updated from a watch. When
//!   a rule is deleted or changes which destinations it probes, its scan
//!   history is discarded.
//! - [`nodes`] holds the cluster's nodes, keyed by UID, refreshed by a
//!   periodic sync.
//! - [`history`] holds the latest probe outcome per rule, node and
//!   destination.
//!
//! ```text
//! [ FirewallRule ] --invalidates--> [ History ] <--records-- [ Node ]
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod history;
pub mod nodes;
pub mod rules;


pub use self::history::HistoryIndex;
