//! Proxy runtime API
//!
//! Builds every service object once, wires them together and owns the
//! background tasks: the proxy listener, the capture log tail and the
//! in-flight reaper.

use crate::proxy::dispatcher::Dispatcher;
use crate::proxy::forwarder::Forwarder;
use crate::proxy::hooks::FlowHooks;
use crate::proxy::recorder::Recorder;
use crate::proxy::rules::{JsonFileRuleSource, RuleStore};
use crate::proxy::server::{passthrough_client, run_server};
use crate::storage::CaptureStore;
use crate::stream::{Broadcaster, LogTail, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Bind address (e.g., "127.0.0.1")
    pub bind_address: String,
    /// Port to listen on; 0 picks a free port
    pub port: u16,
    /// Directory holding the rule document and the capture log
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/config.json`
    pub rules_file: Option<PathBuf>,
    /// Defaults to `<data_dir>/captures.jsonl`
    pub capture_file: Option<PathBuf>,
    pub capture_capacity: usize,
    pub tail_interval_ms: u64,
    pub forward_timeout_secs: u64,
    pub inflight_ttl_secs: u64,
    pub max_inflight: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            rules_file: None,
            capture_file: None,
            capture_capacity: crate::storage::DEFAULT_CAPACITY,
            tail_interval_ms: crate::stream::DEFAULT_TAIL_INTERVAL.as_millis() as u64,
            forward_timeout_secs: crate::proxy::forwarder::FORWARD_TIMEOUT.as_secs(),
            inflight_ttl_secs: crate::proxy::recorder::DEFAULT_INFLIGHT_TTL.as_secs(),
            max_inflight: crate::proxy::recorder::DEFAULT_MAX_INFLIGHT,
        }
    }
}

impl ProxyConfig {
    /// Load from a JSON file; missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading proxy config {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing proxy config {:?}", path))
    }

    pub fn rules_path(&self) -> PathBuf {
        self.rules_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("config.json"))
    }

    pub fn capture_path(&self) -> PathBuf {
        self.capture_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("captures.jsonl"))
    }

    fn inflight_ttl(&self) -> Duration {
        Duration::from_secs(self.inflight_ttl_secs.max(1))
    }

    fn reap_interval(&self) -> Duration {
        (self.inflight_ttl() / 2).clamp(Duration::from_millis(100), Duration::from_secs(30))
    }
}

/// A running proxy and its background tasks.
pub struct ProxyRuntime {
    local_addr: SocketAddr,
    rules: Arc<RuleStore>,
    captures: Arc<CaptureStore>,
    broadcaster: Arc<Broadcaster>,
    hooks: FlowHooks,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProxyRuntime {
    pub async fn start(config: ProxyConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data directory {:?}", config.data_dir))?;

        let rules_path = config.rules_path();
        let rules = tokio::task::spawn_blocking(move || {
            Arc::new(RuleStore::new(JsonFileRuleSource::new(rules_path)))
        })
        .await?;

        let capture_path = config.capture_path();
        let captures =
            Arc::new(CaptureStore::open(&capture_path, config.capture_capacity).await?);
        let recorder = Arc::new(Recorder::new(
            Arc::clone(&captures),
            config.max_inflight,
            config.inflight_ttl(),
        ));

        let timeout = Duration::from_secs(config.forward_timeout_secs.max(1));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&rules),
            Forwarder::with_timeout(timeout)?,
        ));
        let hooks = FlowHooks::new(dispatcher, Arc::clone(&recorder));
        let broadcaster = Broadcaster::new(DEFAULT_SUBSCRIBER_BUFFER);

        let addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding proxy listener on {}", addr))?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(LogTail::from_end(&capture_path).await.spawn(
            Arc::clone(&broadcaster),
            Duration::from_millis(config.tail_interval_ms.max(1)),
            shutdown_rx.clone(),
        ));
        tasks.push(recorder.spawn_reaper(config.reap_interval(), shutdown_rx.clone()));

        let client = passthrough_client(timeout)?;
        let server_hooks = hooks.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_server(listener, server_hooks, client, shutdown_rx).await {
                tracing::error!("Proxy server error: {}", e);
            }
        }));

        tracing::info!(
            "Proxy started on {} (rules {:?}, captures {:?})",
            local_addr,
            config.rules_path(),
            capture_path
        );

        Ok(Self {
            local_addr,
            rules,
            captures,
            broadcaster,
            hooks,
            shutdown,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn captures(&self) -> Arc<CaptureStore> {
        Arc::clone(&self.captures)
    }

    pub fn hooks(&self) -> &FlowHooks {
        &self.hooks
    }

    /// New live subscription to `new_capture` events.
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    /// Signal shutdown and wait for every background task to finish.
    pub async fn stop(self) -> anyhow::Result<()> {
        tracing::info!("Stopping proxy on {}", self.local_addr);
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!("Failed to await proxy task: {err}");
            }
        }
        Ok(())
    }
}
