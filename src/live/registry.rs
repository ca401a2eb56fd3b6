//! Source registry
//!
//! One `LiveSource` per stream URL, created on first reference by either a
//! publisher or a player. The registry is an explicit object shared by the
//! server and its connections; a periodic sweep drops sources that nobody
//! has used for the configured cleanup delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::live::config::{LiveConfig, VhostConfig};
use crate::live::source::{LiveSource, SourceStats};

/// Stream URL: vhost, app and stream name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub vhost: String,
    pub app: String,
    pub stream: String,
}

impl StreamKey {
    /// Query parameters on the stream name (`name?token=..`) are not part
    /// of the key
    pub fn new(vhost: impl Into<String>, app: impl Into<String>, stream: impl AsRef<str>) -> Self {
        let stream = stream.as_ref();
        let stream = stream.split('?').next().unwrap_or(stream);
        let app = app.into();
        Self {
            vhost: vhost.into(),
            app: app.trim_matches('/').to_string(),
            stream: stream.trim_matches('/').to_string(),
        }
    }

    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.vhost, self.app, self.stream)
    }
}

pub struct SourceRegistry {
    sources: RwLock<HashMap<StreamKey, Arc<LiveSource>>>,
    config: Arc<dyn VhostConfig>,
}

impl SourceRegistry {
    pub fn new(config: Arc<dyn VhostConfig>) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn with_config(config: LiveConfig) -> Self {
        Self::new(Arc::new(config))
    }

    pub fn config(&self) -> &Arc<dyn VhostConfig> {
        &self.config
    }

    /// Return the source for `key`, creating it with the vhost's settings
    /// if this is the first reference
    pub async fn fetch_or_create(&self, key: &StreamKey) -> Arc<LiveSource> {
        if let Some(source) = self.sources.read().await.get(key) {
            return Arc::clone(source);
        }

        let mut sources = self.sources.write().await;
        let source = sources.entry(key.clone()).or_insert_with(|| {
            tracing::info!(stream = %key, "Source created");
            Arc::new(LiveSource::new(key.clone(), self.config.settings(&key.vhost)))
        });
        Arc::clone(source)
    }

    pub async fn get(&self, key: &StreamKey) -> Option<Arc<LiveSource>> {
        self.sources.read().await.get(key).cloned()
    }

    /// Remove sources that have had neither a publisher nor consumers for
    /// the cleanup delay. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let delay = self.config.source_cleanup_delay();
        let mut sources = self.sources.write().await;
        let before = sources.len();

        // A source still referenced outside the registry (a connection that
        // fetched it but has not published or played yet) stays.
        sources.retain(|key, source| {
            let remove = source.is_expired(delay) && Arc::strong_count(source) == 1;
            if remove {
                tracing::info!(stream = %key, "Source removed by cleanup");
            }
            !remove
        });

        before - sources.len()
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }

    pub async fn stats(&self, key: &StreamKey) -> Option<SourceStats> {
        self.get(key).await.map(|source| source.stats())
    }

    /// Stats for every source, ordered by key
    pub async fn all_stats(&self) -> Vec<(StreamKey, SourceStats)> {
        let sources = self.sources.read().await;
        let mut stats: Vec<_> = sources
            .iter()
            .map(|(key, source)| (key.clone(), source.stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_config(LiveConfig::default())
    }
}
