use crate::{
    core::{RuleId, Trigger},
    RedisPublisher,
};
use anyhow::{bail, Context, Result};
use clap::Parser;

/// Publishes a scan trigger to every auditor worker.
#[derive(Debug, Parser)]
#[clap(name = "fw-trigger", about = "Triggers firewall rule scans")]
pub struct TriggerArgs {
    #[clap(long, default_value = "fw_trigger=info,warn", env = "FW_AUDITOR_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(long, env = "REDIS_URL")]
    redis_url: String,

    /// Scans every rule on every node.
    #[clap(long, conflicts_with = "rule_ids")]
    all: bool,

    /// Scans only the listed rules (`<namespace>/<name>`, comma-separated).
    #[clap(long, value_delimiter = ',')]
    rule_ids: Vec<String>,
}

impl TriggerArgs {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            redis_url,
            all,
            rule_ids,
        } = self;

        log_format.try_init(log_level)?;

        if !all && rule_ids.is_empty() {
            bail!("either --all or --rule-ids must be set");
        }

        let client = redis::Client::open(redis_url).context("invalid redis URL")?;
        let trigger = Trigger::new(RedisPublisher::connect(&client).await?);
        if all {
            trigger.trigger_all().await
        } else {
            trigger
                .trigger_by_rule_ids(rule_ids.into_iter().map(RuleId).collect())
                .await
        }
    }
}
