//! Reachability probes.
//!
//! A rule is probed with one of two strategies: rules routed through the
//! forward proxy issue an HTTP request per destination address, all other
//! rules dial each (address, port) pair directly.

use crate::{history::ScanStatus, rule::Rule};
use anyhow::Result;
use reqwest::Url;
use std::{error::Error as StdError, time::Duration};

mod dial;
mod proxy;

pub use self::{
    dial::DirectDial,
    proxy::{ProxyProbe, NO_PROXY, PROXY_REJECTED},
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// The result of a single probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error(String),
}

/// The probe strategy selected for a rule.
#[derive(Clone, Debug)]
pub enum Strategy {
    DirectDial(DirectDial),
    ProxyProbe(ProxyProbe),
}

/// Configured probes, shared by all scans.
#[derive(Clone, Debug)]
pub struct Probes {
    dial: DirectDial,
    proxy: ProxyProbe,
}

// === impl Outcome ===

impl Outcome {
    pub fn status(&self) -> ScanStatus {
        match self {
            Self::Success => ScanStatus::Success,
            Self::Error(_) => ScanStatus::Error,
        }
    }

    pub fn into_error_message(self) -> Option<String> {
        match self {
            Self::Success => None,
            Self::Error(message) => Some(message),
        }
    }
}

// === impl Strategy ===

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectDial(_) => "direct_dial",
            Self::ProxyProbe(_) => "proxy",
        }
    }

    /// Probes a single destination. `port` is the raw port specifier and is
    /// ignored by proxy probes.
    pub async fn probe(&self, address: &str, port: Option<&str>) -> Outcome {
        match self {
            Self::DirectDial(dial) => match port {
                Some(port) => dial.probe(address, port).await,
                None => Outcome::Error(format!("no destination port for {address}")),
            },
            Self::ProxyProbe(proxy) => proxy.probe(address).await,
        }
    }
}

// === impl Probes ===

impl Probes {
    pub fn new(timeout: Duration, proxy: Option<Url>) -> Result<Self> {
        let proxy = match proxy {
            Some(url) => ProxyProbe::new(url, timeout)?,
            None => ProxyProbe::unconfigured(),
        };
        Ok(Self {
            dial: DirectDial::new(timeout),
            proxy,
        })
    }

    pub fn strategy(&self, rule: &Rule) -> Strategy {
        if rule.is_through_proxy {
            Strategy::ProxyProbe(self.proxy.clone())
        } else {
            Strategy::DirectDial(self.dial.clone())
        }
    }
}

impl Default for Probes {
    fn default() -> Self {
        Self {
            dial: DirectDial::new(DEFAULT_TIMEOUT),
            proxy: ProxyProbe::unconfigured(),
        }
    }
}

/// Renders an error followed by each of its sources.
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
