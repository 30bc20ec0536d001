use crate::{
    core::{
        probe::Probes, scan::DEFAULT_MAX_CONCURRENT_PROBES, AuditMetrics, DispatchTable,
        EventType, ScanStatus, Scanner,
    },
    history_api,
    index::{self, HistoryIndex},
    k8s,
    node_sync, pubsub, NodeLookup, PodNodeIdentity, RuleLookup,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use reqwest::Url;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    time::{self, Duration},
};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "fw-auditor", about = "Audits firewall rules from each cluster node")]
pub struct Args {
    #[clap(long, default_value = "fw_auditor=info,warn", env = "FW_AUDITOR_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, env = "REDIS_URL")]
    redis_url: String,

    /// Forward proxy through which proxy-routed rules are probed.
    #[clap(long, env = "PROXY_SCAN_URL")]
    proxy_scan_url: Option<Url>,

    #[clap(long, default_value = "1000")]
    scan_timeout_ms: u64,

    #[clap(long, default_value_t = DEFAULT_MAX_CONCURRENT_PROBES)]
    max_concurrent_probes: usize,

    /// The namespace of this worker's pod.
    #[clap(long, env = "NAMESPACE", default_value = "default")]
    namespace: String,

    /// The name of this worker's pod.
    #[clap(long, env = "HOSTNAME")]
    pod_name: String,

    #[clap(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    node_sync_interval_secs: u64,

    /// Scans all rules on this interval, in addition to triggered scans.
    #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
    scan_interval_secs: Option<u64>,

    /// Serves recorded scan history as JSON.
    #[clap(long, default_value = "0.0.0.0:9991")]
    history_addr: SocketAddr,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            redis_url,
            proxy_scan_url,
            scan_timeout_ms,
            max_concurrent_probes,
            namespace,
            pod_name,
            node_sync_interval_secs,
            scan_interval_secs,
            history_addr,
        } = self;

        let probes = Probes::new(Duration::from_millis(scan_timeout_ms), proxy_scan_url)?;
        let redis = redis::Client::open(redis_url).context("invalid redis URL")?;

        let mut prom = <Registry>::default();
        let metrics = AuditMetrics::register(prom.sub_registry_with_prefix("fw_auditor"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let history = HistoryIndex::default();
        let rules = index::rules::Index::shared(history.clone());
        let nodes = index::nodes::Index::shared();

        let listener = TcpListener::bind(history_addr)
            .await
            .with_context(|| format!("failed to bind history server on {history_addr}"))?;
        tokio::spawn(
            history_api::serve(listener, history.clone(), runtime.shutdown_handle())
                .instrument(info_span!("history")),
        );

        // Populate the node index before accepting triggers so that the
        // current node can be resolved.
        let listed = node_sync::sync(&runtime.client(), &nodes).await?;
        info!(nodes = listed, "Synced nodes");
        tokio::spawn(
            node_sync::run(
                runtime.client(),
                nodes.clone(),
                Duration::from_secs(node_sync_interval_secs),
            )
            .instrument(info_span!("nodes")),
        );

        let firewall_rules = runtime.watch_all::<k8s::FirewallRule>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(rules.clone(), firewall_rules)
                .instrument(info_span!("firewallrules")),
        );

        let scanner = Scanner::new(
            Arc::new(PodNodeIdentity::new(runtime.client(), namespace, pod_name)),
            Arc::new(NodeLookup(nodes)),
            Arc::new(RuleLookup(rules)),
            Arc::new(history),
            probes,
        )
        .with_max_concurrent_probes(max_concurrent_probes)
        .with_metrics(metrics.clone());

        let table = DispatchTable::default();
        table.register(EventType::TriggerAll, scanner.clone());
        table.register(EventType::TriggerByRuleIds, scanner.clone());

        tokio::spawn(
            pubsub::subscribe(redis, table, metrics, runtime.shutdown_handle())
                .instrument(info_span!("triggers")),
        );

        if let Some(secs) = scan_interval_secs {
            tokio::spawn(
                scan_periodically(scanner, Duration::from_secs(secs))
                    .instrument(info_span!("periodic")),
            );
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Scans all rules on a fixed interval, waiting for each scan to complete
/// before starting the next.
async fn scan_periodically(scanner: Scanner, interval: Duration) {
    let mut ticks = time::interval(interval);
    ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let batch = match scanner.scan_all().await {
            Ok(batch) => batch,
            Err(error) => {
                warn!(error = %format_args!("{error:#}"), "Failed to start scan");
                continue;
            }
        };
        let reports = batch.finished().await;
        let failed = reports
            .iter()
            .filter(|r| r.status == ScanStatus::Error)
            .count();
        info!(probes = reports.len(), failed, "Completed scan");
    }
}
