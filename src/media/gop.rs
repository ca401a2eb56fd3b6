//! GOP (Group of Pictures) cache for fast-start playback
//!
//! A player that joins mid-stream can only start decoding at a keyframe.
//! The cache keeps every audio/video message since the most recent
//! keyframe so a new consumer can be primed with a decodable window:
//!
//! 1. A keyframe clears the cache and opens a new window
//! 2. Until a keyframe has been seen nothing is cached
//! 3. Audio keeps flowing into an open window between keyframes
//!
//! Sequence headers never enter the cache; the source keeps them in their
//! own slots and replays them ahead of the cached frames.

use std::collections::VecDeque;

use crate::live::message::SharedMessage;

/// Audio messages in a row, with no video, after which the stream is
/// treated as audio-only and the cache is dropped
pub const PURE_AUDIO_GUESS_COUNT: usize = 115;

/// Default bound on cached payload bytes
pub const DEFAULT_GOP_MAX_BYTES: usize = 16 * 1024 * 1024;

/// Keyframe-aligned message cache
#[derive(Debug)]
pub struct GopCache {
    enabled: bool,
    /// 0 means unbounded
    max_frames: usize,
    /// 0 means unbounded
    max_bytes: usize,
    messages: VecDeque<SharedMessage>,
    bytes: usize,
    /// Whether a keyframe has opened the current window
    window_open: bool,
    audio_after_last_video: usize,
}

impl GopCache {
    pub fn new(enabled: bool) -> Self {
        Self::with_limits(enabled, 0, DEFAULT_GOP_MAX_BYTES)
    }

    pub fn with_limits(enabled: bool, max_frames: usize, max_bytes: usize) -> Self {
        Self {
            enabled,
            max_frames,
            max_bytes,
            messages: VecDeque::new(),
            bytes: 0,
            window_open: false,
            audio_after_last_video: 0,
        }
    }

    /// Turning the cache off drops whatever it holds
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.clear();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Offer a message to the cache; returns whether it was kept.
    ///
    /// Callers handle sequence headers and metadata themselves.
    pub fn cache(&mut self, msg: &SharedMessage) -> bool {
        if !self.enabled || !msg.is_av() {
            return false;
        }

        if msg.is_video() {
            self.audio_after_last_video = 0;
            if msg.is_keyframe() {
                self.clear();
                self.window_open = true;
            }
        } else {
            self.audio_after_last_video += 1;
            if self.audio_after_last_video > PURE_AUDIO_GUESS_COUNT {
                if self.window_open {
                    tracing::debug!(
                        audio = self.audio_after_last_video,
                        "No video for a while, dropping GOP cache"
                    );
                    self.clear();
                }
                return false;
            }
        }

        if !self.window_open {
            return false;
        }

        let over_frames = self.max_frames > 0 && self.messages.len() + 1 > self.max_frames;
        let over_bytes = self.max_bytes > 0 && self.bytes + msg.size() > self.max_bytes;
        if over_frames || over_bytes {
            tracing::warn!(
                frames = self.messages.len(),
                bytes = self.bytes,
                max_frames = self.max_frames,
                max_bytes = self.max_bytes,
                "GOP cache overflow, waiting for next keyframe"
            );
            self.clear();
            return false;
        }

        self.bytes += msg.size();
        self.messages.push_back(msg.clone());
        true
    }

    /// Drop all cached messages and close the window
    pub fn clear(&mut self) {
        self.messages.clear();
        self.bytes = 0;
        self.window_open = false;
    }

    /// Cached messages in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &SharedMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Cached payload bytes
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Timestamp of the keyframe that opened the window
    pub fn start_time(&self) -> Option<u32> {
        self.messages.front().map(SharedMessage::timestamp)
    }

    /// Span between the first and last cached message
    pub fn duration(&self) -> Option<u32> {
        let first = self.messages.front()?.timestamp();
        let last = self.messages.back()?.timestamp();
        Some(last.wrapping_sub(first))
    }
}

impl Default for GopCache {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::protocol::constants::{MSG_AUDIO, MSG_VIDEO};

    fn video(timestamp: u32, keyframe: bool, size: usize) -> SharedMessage {
        let mut data = vec![0u8; size.max(2)];
        data[0] = if keyframe { 0x17 } else { 0x27 };
        data[1] = 0x01;
        SharedMessage::new(MSG_VIDEO, timestamp, Bytes::from(data))
    }

    fn audio(timestamp: u32) -> SharedMessage {
        SharedMessage::new(MSG_AUDIO, timestamp, Bytes::from_static(&[0xAF, 0x01, 0x21]))
    }

    #[test]
    fn test_nothing_cached_before_keyframe() {
        let mut cache = GopCache::default();

        assert!(!cache.cache(&video(0, false, 10)));
        assert!(!cache.cache(&audio(10)));
        assert!(cache.is_empty());

        assert!(cache.cache(&video(33, true, 10)));
        assert!(cache.cache(&audio(40)));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.start_time(), Some(33));
    }

    #[test]
    fn test_keyframe_resets_window() {
        let mut cache = GopCache::default();

        cache.cache(&video(0, true, 100));
        cache.cache(&video(33, false, 50));
        cache.cache(&video(66, false, 50));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.bytes(), 200);

        cache.cache(&video(100, true, 100));
        cache.cache(&video(133, false, 50));

        let timestamps: Vec<u32> = cache.iter().map(|m| m.timestamp()).collect();
        assert_eq!(timestamps, vec![100, 133]);
        assert!(cache.iter().next().unwrap().is_keyframe());
        assert_eq!(cache.duration(), Some(33));
    }

    #[test]
    fn test_pure_audio_guard() {
        let mut cache = GopCache::default();
        cache.cache(&video(0, true, 10));

        for i in 0..PURE_AUDIO_GUESS_COUNT {
            assert!(cache.cache(&audio(i as u32)));
        }
        assert_eq!(cache.len(), PURE_AUDIO_GUESS_COUNT + 1);

        assert!(!cache.cache(&audio(999)));
        assert!(cache.is_empty());

        // An inter frame does not reopen the window
        assert!(!cache.cache(&video(1000, false, 10)));
        assert!(cache.cache(&video(1033, true, 10)));
    }

    #[test]
    fn test_frame_bound_clears_until_keyframe() {
        let mut cache = GopCache::with_limits(true, 3, 0);

        cache.cache(&video(0, true, 10));
        cache.cache(&video(33, false, 10));
        cache.cache(&video(66, false, 10));
        assert!(!cache.cache(&video(99, false, 10)));
        assert!(cache.is_empty());

        assert!(!cache.cache(&video(133, false, 10)));
        assert!(cache.cache(&video(166, true, 10)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_byte_bound() {
        let mut cache = GopCache::with_limits(true, 0, 250);

        assert!(cache.cache(&video(0, true, 100)));
        assert!(cache.cache(&video(33, false, 100)));
        assert!(!cache.cache(&video(66, false, 100)));
        assert_eq!(cache.bytes(), 0);
    }

    #[test]
    fn test_disabled_cache() {
        let mut cache = GopCache::new(false);
        assert!(!cache.cache(&video(0, true, 10)));

        cache.set_enabled(true);
        assert!(cache.cache(&video(0, true, 10)));

        cache.set_enabled(false);
        assert!(cache.is_empty());
    }
}
