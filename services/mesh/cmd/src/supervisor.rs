//! Node lifecycle.
//!
//! The supervisor starts a node and watches its topology status. When the
//! node enters `RestartRequested` it is torn down and rebuilt from the same
//! configuration and key-value store, which is how a node gives up its role
//! after losing a merge or failing to find its root.

use crate::config::NodeConfig;
use crate::node::Node;
use crate::{component_error, component_info, component_warn};
use anyhow::Result;
use mesh_storage::KvStore;
use mesh_topology::{TopologyState, TopologyStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Start attempts before giving up
const MAX_START_ATTEMPTS: u32 = 5;

/// Longest pause between start attempts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Rebuilds the node whenever it requests a restart
pub struct Supervisor {
    config: NodeConfig,
    kv: Arc<dyn KvStore>,
}

impl Supervisor {
    /// Create a supervisor for `config`
    pub fn new(config: NodeConfig, kv: Arc<dyn KvStore>) -> Self {
        Self { config, kv }
    }

    /// Run nodes until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut generation = 0u64;

        loop {
            generation += 1;
            let node = self.start_with_retry().await?;
            component_info!(
                "supervisor",
                "Node generation {} running on {}",
                generation,
                node.local_addr()
            );

            let mut status = node.topology().subscribe();
            tokio::select! {
                _ = &mut shutdown => {
                    component_info!("supervisor", "Shutdown requested");
                    node.shutdown();
                    return Ok(());
                }
                reason = wait_for_restart(&mut status) => {
                    component_warn!("supervisor", "Restarting node: {}", reason);
                    node.shutdown();
                    sleep(self.config.node.restart_delay).await;
                }
            }
        }
    }

    /// Start a node, retrying while its sockets are still held by the last one
    async fn start_with_retry(&self) -> Result<Node> {
        let mut attempt = 0;
        let mut retry_delay = self.config.node.restart_delay;

        loop {
            match Node::start(&self.config, self.kv.clone()).await {
                Ok(node) => return Ok(node),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_START_ATTEMPTS {
                        component_error!("supervisor", "Giving up after {} attempts", attempt);
                        return Err(e.context(format!(
                            "node failed to start after {} attempts",
                            attempt
                        )));
                    }
                    component_warn!(
                        "supervisor",
                        "Node start failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempt,
                        MAX_START_ATTEMPTS,
                        e,
                        retry_delay
                    );
                    sleep(retry_delay).await;
                    retry_delay = std::cmp::min(retry_delay * 2, MAX_RETRY_DELAY);
                }
            }
        }
    }
}

/// Resolve with the reason once the status reaches `RestartRequested`
async fn wait_for_restart(status: &mut watch::Receiver<TopologyStatus>) -> String {
    loop {
        if let TopologyState::RestartRequested { reason } = &status.borrow_and_update().state {
            return reason.clone();
        }
        if status.changed().await.is_err() {
            // publisher gone without a restart; nothing left to watch
            std::future::pending::<()>().await;
        }
    }
}
