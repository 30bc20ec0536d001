use crate::{
    core::NodeId,
    index::nodes::{self, SharedIndex},
    k8s::{self, Api, Client, ListParams},
};
use anyhow::{Context, Result};
use std::collections::HashSet;
use tokio::time;
use tracing::{debug, info, warn};

/// Lists the cluster's nodes and records each of them in the index.
///
/// Nodes that are no longer listed are kept.
pub(crate) async fn sync(client: &Client, index: &SharedIndex) -> Result<usize> {
    let list = Api::<k8s::Node>::all(client.clone())
        .list(&ListParams::default())
        .await
        .context("failed to list nodes")?;

    let mut listed = HashSet::with_capacity(list.items.len());
    let mut added = 0;
    {
        let mut index = index.write();
        for node in &list.items {
            let Some(node) = nodes::mk_node(node) else {
                debug!("Ignoring node without a UID");
                continue;
            };
            listed.insert(node.id.clone());
            if index.apply(node) {
                added += 1;
            }
        }
    }

    let departed = index
        .read()
        .ids()
        .filter(|id| !listed.contains(*id))
        .cloned()
        .collect::<Vec<NodeId>>();
    if !departed.is_empty() {
        info!(?departed, "Nodes are no longer listed");
    }
    debug!(listed = listed.len(), added, "Synced nodes");
    Ok(listed.len())
}

/// Syncs nodes on a fixed interval. Failures are retried on the next tick.
pub(crate) async fn run(client: Client, index: SharedIndex, interval: time::Duration) {
    let mut ticks = time::interval(interval);
    ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        if let Err(error) = sync(&client, &index).await {
            warn!(error = %format_args!("{error:#}"), "Failed to sync nodes");
        }
    }
}
