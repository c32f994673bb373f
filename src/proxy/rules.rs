//! Rule store
//!
//! Holds the current immutable [`RuleSnapshot`]. A reload reads the whole
//! configuration, compiles it, and swaps the snapshot pointer; readers keep
//! whichever `Arc` they grabbed, so a dispatch decision never sees a partially
//! reloaded rule set.

use crate::models::{FileRule, InterceptedRequest, MappingRule, MockRule, RuleConfig};
use crate::proxy::matcher::{mock_key_for_request, mock_key_for_rule, UrlPattern};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("reading rules from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing rules from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where rule configuration comes from.
pub trait RuleSource: Send + Sync {
    fn load(&self) -> Result<RuleConfig, RuleLoadError>;
}

impl<T: RuleSource + ?Sized> RuleSource for Arc<T> {
    fn load(&self) -> Result<RuleConfig, RuleLoadError> {
        (**self).load()
    }
}

/// Reads the JSON configuration document from disk on every load.
#[derive(Debug, Clone)]
pub struct JsonFileRuleSource {
    path: PathBuf,
}

impl JsonFileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleSource for JsonFileRuleSource {
    fn load(&self) -> Result<RuleConfig, RuleLoadError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RuleConfig::default())
            }
            Err(source) => {
                return Err(RuleLoadError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| RuleLoadError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory configuration, for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticRuleSource {
    config: RwLock<RuleConfig>,
}

impl StaticRuleSource {
    pub fn new(config: RuleConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn set(&self, config: RuleConfig) {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }
}

impl RuleSource for StaticRuleSource {
    fn load(&self) -> Result<RuleConfig, RuleLoadError> {
        Ok(self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

#[derive(Debug, Clone)]
struct CompiledMapping {
    rule: MappingRule,
    pattern: UrlPattern,
}

#[derive(Debug, Clone)]
struct CompiledFileRule {
    rule: FileRule,
    pattern: UrlPattern,
}

/// Point-in-time, compiled copy of all three rule sets. Disabled rules are
/// dropped at build time.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    mappings: Vec<CompiledMapping>,
    files: Vec<CompiledFileRule>,
    mocks: HashMap<String, MockRule>,
}

impl RuleSnapshot {
    pub fn from_config(config: RuleConfig) -> Self {
        let mappings = config
            .mappings
            .into_iter()
            .filter(|rule| rule.enabled)
            .map(|rule| CompiledMapping {
                pattern: UrlPattern::compile(&rule.url_pattern),
                rule,
            })
            .collect();

        let files = config
            .file_downloads
            .into_iter()
            .filter(|rule| rule.enabled)
            .map(|rule| CompiledFileRule {
                pattern: UrlPattern::compile(&rule.url_pattern),
                rule,
            })
            .collect();

        let mut mocks = HashMap::new();
        for rule in config.apis.into_iter().filter(|rule| rule.enabled) {
            let key = mock_key_for_rule(&rule.method, &rule.url);
            if mocks.contains_key(&key) {
                tracing::debug!("Ignoring duplicate mock rule for {}", key);
                continue;
            }
            mocks.insert(key, rule);
        }

        Self {
            mappings,
            files,
            mocks,
        }
    }

    /// Enabled mapping rules matching the request, in configuration order.
    pub fn mapping_candidates<'a>(
        &'a self,
        req: &'a InterceptedRequest,
    ) -> impl Iterator<Item = &'a MappingRule> + 'a {
        self.mappings
            .iter()
            .filter(move |m| m.rule.allows_method(&req.method) && m.pattern.is_match(&req.url))
            .map(|m| &m.rule)
    }

    /// Enabled file rules matching the request, in configuration order.
    pub fn file_candidates<'a>(
        &'a self,
        req: &'a InterceptedRequest,
    ) -> impl Iterator<Item = &'a FileRule> + 'a {
        self.files
            .iter()
            .filter(move |f| f.pattern.is_match(&req.url))
            .map(|f| &f.rule)
    }

    pub fn mock_for(&self, req: &InterceptedRequest) -> Option<&MockRule> {
        self.mocks.get(&mock_key_for_request(req))
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty() && self.files.is_empty() && self.mocks.is_empty()
    }
}

/// Owner of the current rule snapshot.
pub struct RuleStore {
    source: Box<dyn RuleSource>,
    next_generation: AtomicU64,
    /// Snapshot plus the generation of the load that produced it
    current: RwLock<(u64, Arc<RuleSnapshot>)>,
}

impl RuleStore {
    /// Create the store and perform the first load. A failed first load
    /// leaves an empty snapshot in place.
    pub fn new(source: impl RuleSource + 'static) -> Self {
        let store = Self {
            source: Box::new(source),
            next_generation: AtomicU64::new(1),
            current: RwLock::new((0, Arc::new(RuleSnapshot::default()))),
        };
        if let Err(err) = store.reload() {
            tracing::warn!("Initial rule load failed: {}", err);
        }
        store
    }

    /// The snapshot as of the last completed reload.
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard.1)
    }

    /// Re-read the source and swap in a freshly compiled snapshot.
    ///
    /// Loads are ordered by when they started; a load that finishes after a
    /// later one does not replace the newer snapshot.
    pub fn reload(&self) -> Result<Arc<RuleSnapshot>, RuleLoadError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let config = self.source.load()?;
        let snapshot = Arc::new(RuleSnapshot::from_config(config));
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if generation > guard.0 {
            *guard = (generation, Arc::clone(&snapshot));
        } else {
            tracing::debug!("Discarding rule load {} superseded by {}", generation, guard.0);
        }
        Ok(snapshot)
    }

    /// Reload, falling back to the previous snapshot when the source cannot
    /// be read.
    pub fn refresh(&self) -> Arc<RuleSnapshot> {
        match self.reload() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!("Rule reload failed, keeping previous rules: {}", err);
                self.snapshot()
            }
        }
    }
}
