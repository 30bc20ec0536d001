#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod firewall_rule;
pub mod node;

pub use self::firewall_rule::{FirewallRule, FirewallRuleSpec};
pub use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus, Pod, PodSpec};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, ResourceExt},
    Client, Resource,
};
