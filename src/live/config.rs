//! Live streaming configuration
//!
//! Settings are resolved per vhost. `LiveConfig` holds defaults plus
//! per-vhost overrides; anything else can plug in by implementing
//! `VhostConfig`.

use std::collections::HashMap;
use std::time::Duration;

use crate::live::jitter::{JitterAlgorithm, DEFAULT_MAX_JUMP_MS};
use crate::live::queue::{OverflowPolicy, DEFAULT_QUEUE_MAX_LENGTH};
use crate::media::gop::DEFAULT_GOP_MAX_BYTES;

/// How long an abandoned source lingers before the registry drops it
pub const DEFAULT_SOURCE_CLEANUP_DELAY: Duration = Duration::from_secs(3);

/// Settings for the sources of one vhost
#[derive(Debug, Clone, PartialEq)]
pub struct VhostSettings {
    /// Cache the current GOP for fast start
    pub gop_cache_enabled: bool,

    /// Maximum cached messages (0 = unbounded)
    pub gop_cache_max_frames: usize,

    /// Maximum cached payload bytes (0 = unbounded)
    pub gop_cache_max_bytes: usize,

    /// Maximum queued messages per consumer (0 = unbounded)
    pub queue_max_length: usize,

    /// Consumer queue overflow handling
    pub queue_overflow: OverflowPolicy,

    /// Timestamp correction applied to each consumer
    pub jitter_algorithm: JitterAlgorithm,

    /// Largest forward step `Full` jitter lets through
    pub jitter_max_jump_ms: u32,

    /// Forget cached sequence headers and metadata when a publisher starts
    pub clear_headers_on_publish: bool,
}

impl Default for VhostSettings {
    fn default() -> Self {
        Self {
            gop_cache_enabled: true,
            gop_cache_max_frames: 0,
            gop_cache_max_bytes: DEFAULT_GOP_MAX_BYTES,
            queue_max_length: DEFAULT_QUEUE_MAX_LENGTH,
            queue_overflow: OverflowPolicy::DropOldest,
            jitter_algorithm: JitterAlgorithm::Full,
            jitter_max_jump_ms: DEFAULT_MAX_JUMP_MS,
            clear_headers_on_publish: false,
        }
    }
}

impl VhostSettings {
    pub fn disable_gop_cache(mut self) -> Self {
        self.gop_cache_enabled = false;
        self
    }

    pub fn gop_cache_limits(mut self, max_frames: usize, max_bytes: usize) -> Self {
        self.gop_cache_max_frames = max_frames;
        self.gop_cache_max_bytes = max_bytes;
        self
    }

    pub fn queue(mut self, max_length: usize, overflow: OverflowPolicy) -> Self {
        self.queue_max_length = max_length;
        self.queue_overflow = overflow;
        self
    }

    pub fn jitter(mut self, algorithm: JitterAlgorithm, max_jump_ms: u32) -> Self {
        self.jitter_algorithm = algorithm;
        self.jitter_max_jump_ms = max_jump_ms;
        self
    }

    pub fn clear_headers_on_publish(mut self, clear: bool) -> Self {
        self.clear_headers_on_publish = clear;
        self
    }
}

/// Read-only per-vhost lookups used by sources and the registry
pub trait VhostConfig: Send + Sync {
    /// Everything a source needs, resolved for `vhost`
    fn settings(&self, vhost: &str) -> VhostSettings;

    fn gop_cache_enabled(&self, vhost: &str) -> bool {
        self.settings(vhost).gop_cache_enabled
    }

    fn queue_max_length(&self, vhost: &str) -> usize {
        self.settings(vhost).queue_max_length
    }

    fn jitter_algorithm(&self, vhost: &str) -> JitterAlgorithm {
        self.settings(vhost).jitter_algorithm
    }

    /// Idle time after which a source with no publisher or consumers is removed
    fn source_cleanup_delay(&self) -> Duration {
        DEFAULT_SOURCE_CLEANUP_DELAY
    }
}

/// Defaults plus per-vhost overrides
#[derive(Debug, Clone, Default)]
pub struct LiveConfig {
    pub defaults: VhostSettings,
    vhosts: HashMap<String, VhostSettings>,
    cleanup_delay: Option<Duration>,
}

impl LiveConfig {
    pub fn new(defaults: VhostSettings) -> Self {
        Self {
            defaults,
            ..Default::default()
        }
    }

    /// Override settings for one vhost
    pub fn vhost(mut self, name: impl Into<String>, settings: VhostSettings) -> Self {
        self.vhosts.insert(name.into(), settings);
        self
    }

    pub fn cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = Some(delay);
        self
    }
}

impl VhostConfig for LiveConfig {
    fn settings(&self, vhost: &str) -> VhostSettings {
        self.vhosts
            .get(vhost)
            .unwrap_or(&self.defaults)
            .clone()
    }

    fn source_cleanup_delay(&self) -> Duration {
        self.cleanup_delay.unwrap_or(DEFAULT_SOURCE_CLEANUP_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LiveConfig::default();

        assert!(config.gop_cache_enabled("any"));
        assert_eq!(config.queue_max_length("any"), DEFAULT_QUEUE_MAX_LENGTH);
        assert_eq!(config.jitter_algorithm("any"), JitterAlgorithm::Full);
        assert_eq!(config.source_cleanup_delay(), DEFAULT_SOURCE_CLEANUP_DELAY);
        assert!(!config.settings("any").clear_headers_on_publish);
    }

    #[test]
    fn test_vhost_override() {
        let config = LiveConfig::default()
            .vhost(
                "low-latency.example.com",
                VhostSettings::default()
                    .disable_gop_cache()
                    .jitter(JitterAlgorithm::Zero, 0)
                    .queue(64, OverflowPolicy::ShrinkToHeaders),
            )
            .cleanup_delay(Duration::from_secs(10));

        assert!(!config.gop_cache_enabled("low-latency.example.com"));
        assert_eq!(config.queue_max_length("low-latency.example.com"), 64);
        assert_eq!(
            config.jitter_algorithm("low-latency.example.com"),
            JitterAlgorithm::Zero
        );
        assert!(config.gop_cache_enabled("other.example.com"));
        assert_eq!(config.source_cleanup_delay(), Duration::from_secs(10));
    }
}
