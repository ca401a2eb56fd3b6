//! Bounded per-consumer message queue

use std::collections::VecDeque;

use crate::live::message::SharedMessage;

/// Default maximum queued messages per consumer
pub const DEFAULT_QUEUE_MAX_LENGTH: usize = 2048;

/// What to do when a consumer falls behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the oldest queued frame; metadata and sequence headers stay
    #[default]
    DropOldest,
    /// Discard everything except the latest sequence headers, so the player
    /// can resync at the next keyframe
    ShrinkToHeaders,
}

#[derive(Debug)]
pub struct MessageQueue {
    messages: VecDeque<SharedMessage>,
    /// 0 means unbounded
    max_length: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl MessageQueue {
    pub fn new(max_length: usize, policy: OverflowPolicy) -> Self {
        Self {
            messages: VecDeque::new(),
            max_length,
            policy,
            dropped: 0,
        }
    }

    /// Append a message; returns how many messages overflow discarded
    pub fn push(&mut self, msg: SharedMessage) -> usize {
        self.messages.push_back(msg);
        if self.max_length == 0 || self.messages.len() <= self.max_length {
            return 0;
        }

        let before = self.messages.len();
        match self.policy {
            OverflowPolicy::DropOldest => {
                while self.messages.len() > self.max_length {
                    let victim = self
                        .messages
                        .iter()
                        .position(|m| m.is_av() && !m.is_sequence_header())
                        .unwrap_or(0);
                    self.messages.remove(victim);
                }
            }
            OverflowPolicy::ShrinkToHeaders => self.shrink(),
        }

        let dropped = before - self.messages.len();
        self.dropped += dropped as u64;
        dropped
    }

    /// Keep only the most recent video and audio sequence headers
    fn shrink(&mut self) {
        let mut video_sh = None;
        let mut audio_sh = None;
        for msg in self.messages.drain(..) {
            if msg.is_sequence_header() {
                if msg.is_video() {
                    video_sh = Some(msg);
                } else {
                    audio_sh = Some(msg);
                }
            }
        }
        self.messages.extend(video_sh);
        self.messages.extend(audio_sh);
    }

    /// Remove up to `max` messages from the front
    pub fn pop_batch(&mut self, max: usize) -> Vec<SharedMessage> {
        let n = max.min(self.messages.len());
        self.messages.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Messages discarded by overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Timestamp span of queued audio/video
    pub fn duration(&self) -> u32 {
        let mut av = self.messages.iter().filter(|m| m.is_av());
        let Some(first) = av.next() else {
            return 0;
        };
        let last = av.last().unwrap_or(first);
        last.timestamp().saturating_sub(first.timestamp())
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_MAX_LENGTH, OverflowPolicy::DropOldest)
    }
}
