//! Standalone mock proxy host.
//!
//! Usage:
//! ```text
//! mockproxy --port 8080 --data-dir ./data
//! ```

use clap::Parser;
use mockproxy_core::api::logging::init_logging;
use mockproxy_core::api::proxy_api::{ProxyConfig, ProxyRuntime};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with proxy settings; flags override it
    #[arg(long, env = "MOCKPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding config.json and captures.jsonl
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of captures kept in memory
    #[arg(long)]
    capacity: Option<usize>,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_file(path)?,
            None => ProxyConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(capacity) = self.capacity {
            config.capture_capacity = capacity;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_dir.as_deref()).map_err(anyhow::Error::msg)?;

    let config = args.into_config()?;
    let runtime = ProxyRuntime::start(config).await?;
    tracing::info!("mockproxy listening on {}", runtime.local_addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    runtime.stop().await
}
