//! Battery monitoring mesh node binary.
//!
//! Runs one node on a host with simulated BMS, WiFi and LoRa hardware. The
//! node serves browsers and mesh peers over WebSocket, answers captive DNS
//! queries and rebuilds itself whenever its topology asks for a restart.

use clap::Parser;
use mesh_storage::{open_kv, KvMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod dns;
mod logging;
mod net;
mod node;
mod sim;
mod supervisor;

use config::NodeConfig;
use logging::NodeLogFormatter;
use supervisor::Supervisor;

/// Battery monitoring mesh node
#[derive(Parser, Debug)]
#[command(name = "bms-mesh", version, about = "Battery monitoring mesh node")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Device name, e.g. bms_03 (node id is the numeric suffix)
    #[arg(long)]
    device_name: Option<String>,

    /// Run as the LoRa receiver bridging radio traffic to the cloud
    #[arg(long)]
    receiver: bool,

    /// HTTP and WebSocket port
    #[arg(long)]
    http_port: Option<u16>,

    /// Captive DNS port, 0 disables it
    #[arg(long)]
    dns_port: Option<u16>,

    /// Cloud host the root reports to
    #[arg(long)]
    cloud_host: Option<String>,

    /// Key-value file; in-memory when unset
    #[arg(long)]
    kv_path: Option<PathBuf>,

    /// Telemetry sampling interval, e.g. 5s
    #[arg(long)]
    read_data: Option<humantime::Duration>,

    /// Root merge check interval, e.g. 60s
    #[arg(long)]
    merge_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(name) = &self.device_name {
            config.node.device_name = name.clone();
        }
        if self.receiver {
            config.node.receiver = true;
        }
        if let Some(port) = self.http_port {
            config.node.http_port = port;
        }
        if let Some(port) = self.dns_port {
            config.node.dns_port = port;
        }
        if let Some(host) = &self.cloud_host {
            config.cloud.host = host.clone();
        }
        if let Some(path) = &self.kv_path {
            config.node.kv_path = Some(path.clone());
        }
        if let Some(interval) = self.read_data {
            config.timers.read_data = Duration::from(interval);
        }
        if let Some(interval) = self.merge_interval {
            config.timers.merge = Duration::from(interval);
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut env_filter = EnvFilter::new("warn");
    for target in [
        "bms_mesh",
        "mesh_wire",
        "mesh_storage",
        "mesh_session",
        "mesh_topology",
        "mesh_routing",
    ] {
        env_filter = env_filter.add_directive(format!("{}={}", target, args.log_level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true)
        .event_format(NodeLogFormatter::new("bms-node"))
        .init();

    let mut config = NodeConfig::load_from_file(&args.config)?;
    args.apply(&mut config);

    info!("Starting bms-mesh node v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Device {} (receiver: {}, lora: {}, cloud: {})",
        config.node.device_name,
        config.node.receiver,
        config.lora.enabled,
        config.cloud.uri()
    );

    let kv_mode = match &config.node.kv_path {
        Some(path) => KvMode::File { path: path.clone() },
        None => KvMode::InMemory,
    };
    let kv = open_kv(kv_mode).await?;

    Supervisor::new(config, kv)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("bms-mesh node stopped");
    Ok(())
}
