//! Live source: one per stream, fed by a single publisher, fanned out to
//! any number of consumers
//!
//! ```text
//!   publisher ──► on_audio / on_video / on_metadata
//!                      │
//!          ┌───────────┼──────────────┬─────────────┐
//!          ▼           ▼              ▼             ▼
//!    header slots   GopCache    ConsumerQueue  ConsumerQueue ...
//!          │           │
//!          └─────┬─────┘
//!                ▼
//!         create_consumer() replay:
//!         metadata → video SH → audio SH → GOP
//! ```
//!
//! All mutation happens under one short `parking_lot` lock that is never
//! held across an await, so replay and fan-out are atomic with respect to
//! each other and a consumer never misses or duplicates a message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::live::config::VhostSettings;
use crate::live::consumer::{Consumer, ConsumerQueue};
use crate::live::message::SharedMessage;
use crate::live::registry::StreamKey;
use crate::media::flv;
use crate::media::gop::GopCache;

/// Snapshot of a source for stats and introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub publisher_id: Option<u64>,
    pub consumer_count: usize,
    pub gop_messages: usize,
    pub gop_bytes: usize,
    pub has_metadata: bool,
    pub has_video_sequence_header: bool,
    pub has_audio_sequence_header: bool,
    pub messages_received: u64,
}

impl SourceStats {
    pub fn has_publisher(&self) -> bool {
        self.publisher_id.is_some()
    }
}

struct SourceState {
    publisher_id: Option<u64>,
    metadata: Option<SharedMessage>,
    video_sequence_header: Option<SharedMessage>,
    audio_sequence_header: Option<SharedMessage>,
    gop_cache: GopCache,
    consumers: Vec<Arc<ConsumerQueue>>,
    /// Set while there is neither a publisher nor a consumer
    idle_since: Option<Instant>,
    messages_received: u64,
}

impl SourceState {
    fn fan_out(&self, msg: &SharedMessage) {
        for consumer in &self.consumers {
            consumer.enqueue(msg.clone());
        }
    }

    fn update_idle(&mut self) {
        if self.publisher_id.is_none() && self.consumers.is_empty() {
            self.idle_since.get_or_insert_with(Instant::now);
        } else {
            self.idle_since = None;
        }
    }
}

pub struct LiveSource {
    key: StreamKey,
    settings: VhostSettings,
    state: Mutex<SourceState>,
    next_consumer_id: AtomicU64,
}

impl LiveSource {
    pub fn new(key: StreamKey, settings: VhostSettings) -> Self {
        let gop_cache = GopCache::with_limits(
            settings.gop_cache_enabled,
            settings.gop_cache_max_frames,
            settings.gop_cache_max_bytes,
        );
        Self {
            key,
            settings,
            state: Mutex::new(SourceState {
                publisher_id: None,
                metadata: None,
                video_sequence_header: None,
                audio_sequence_header: None,
                gop_cache,
                consumers: Vec::new(),
                idle_since: Some(Instant::now()),
                messages_received: 0,
            }),
            next_consumer_id: AtomicU64::new(1),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn settings(&self) -> &VhostSettings {
        &self.settings
    }

    /// Claim the source for a publisher.
    ///
    /// Fails with `Error::Rejected` while another publisher holds it.
    pub fn on_publish(&self, publisher_id: u64) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(current) = state.publisher_id {
            tracing::warn!(
                stream = %self.key,
                current = current,
                rejected = publisher_id,
                "Publish rejected, stream already has a publisher"
            );
            return Err(Error::Rejected(format!(
                "stream {} is already publishing",
                self.key
            )));
        }

        if self.settings.clear_headers_on_publish {
            state.metadata = None;
            state.video_sequence_header = None;
            state.audio_sequence_header = None;
        }
        state.gop_cache.clear();
        state.publisher_id = Some(publisher_id);
        state.update_idle();

        tracing::info!(
            stream = %self.key,
            publisher = publisher_id,
            consumers = state.consumers.len(),
            "Publish started"
        );
        Ok(())
    }

    /// Release the source. Cached headers survive for a republish;
    /// attached consumers are woken so players can notice.
    pub fn on_unpublish(&self, publisher_id: u64) {
        let mut state = self.state.lock();

        if state.publisher_id != Some(publisher_id) {
            tracing::warn!(
                stream = %self.key,
                expected = ?state.publisher_id,
                actual = publisher_id,
                "Unpublish from a session that is not the publisher"
            );
            return;
        }

        state.publisher_id = None;
        state.gop_cache.clear();
        state.update_idle();
        for consumer in &state.consumers {
            consumer.wakeup();
        }

        tracing::info!(
            stream = %self.key,
            publisher = publisher_id,
            consumers = state.consumers.len(),
            "Publish stopped"
        );
    }

    pub fn on_metadata(&self, msg: SharedMessage) {
        let mut state = self.state.lock();
        state.messages_received += 1;
        state.metadata = Some(msg.clone());
        state.fan_out(&msg);
        tracing::debug!(stream = %self.key, size = msg.size(), "Metadata updated");
    }

    pub fn on_audio(&self, msg: SharedMessage) {
        let mut state = self.state.lock();
        state.messages_received += 1;

        if flv::is_audio_sequence_header(msg.payload()) {
            tracing::debug!(stream = %self.key, "Audio sequence header updated");
            state.audio_sequence_header = Some(msg.clone());
        } else {
            state.gop_cache.cache(&msg);
        }
        state.fan_out(&msg);
    }

    pub fn on_video(&self, msg: SharedMessage) {
        let mut state = self.state.lock();
        state.messages_received += 1;

        if flv::is_video_sequence_header(msg.payload()) {
            tracing::debug!(stream = %self.key, "Video sequence header updated");
            state.video_sequence_header = Some(msg.clone());
        } else {
            state.gop_cache.cache(&msg);
        }
        state.fan_out(&msg);
    }

    /// Attach a new consumer, primed with the fast-start data when a
    /// publisher is active
    pub fn create_consumer(self: &Arc<Self>) -> Consumer {
        let id = self.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ConsumerQueue::new(id, &self.settings));

        let mut state = self.state.lock();
        let mut replayed = 0;
        if state.publisher_id.is_some() {
            let headers: Vec<&SharedMessage> = state
                .metadata
                .iter()
                .chain(state.video_sequence_header.iter())
                .chain(state.audio_sequence_header.iter())
                .collect();

            // A GOP cut short by the queue bound would start on inter frames
            let max_length = self.settings.queue_max_length;
            let gop_len = state.gop_cache.len();
            let gop_fits = max_length == 0 || headers.len() + gop_len <= max_length;
            if !gop_fits {
                tracing::warn!(
                    stream = %self.key,
                    consumer = id,
                    gop_messages = gop_len,
                    max_length = max_length,
                    "GOP exceeds consumer queue, replaying headers only"
                );
            }

            let gop = state.gop_cache.iter().take(if gop_fits { gop_len } else { 0 });
            for msg in headers.into_iter().chain(gop) {
                queue.enqueue(msg.clone());
                replayed += 1;
            }
        }
        state.consumers.push(Arc::clone(&queue));
        state.update_idle();

        tracing::info!(
            stream = %self.key,
            consumer = id,
            replayed = replayed,
            consumers = state.consumers.len(),
            "Consumer attached"
        );
        drop(state);

        Consumer::new(queue, Arc::clone(self))
    }

    /// Detach a consumer; called from `Consumer::drop`
    pub fn on_consumer_destroy(&self, consumer_id: u64) {
        let mut state = self.state.lock();
        state.consumers.retain(|c| c.id() != consumer_id);
        state.update_idle();

        tracing::info!(
            stream = %self.key,
            consumer = consumer_id,
            consumers = state.consumers.len(),
            "Consumer detached"
        );
    }

    pub fn is_publishing(&self) -> bool {
        self.state.lock().publisher_id.is_some()
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    /// No publisher, no consumers, and idle for at least `delay`
    pub fn is_expired(&self, delay: Duration) -> bool {
        self.state
            .lock()
            .idle_since
            .map(|since| since.elapsed() >= delay)
            .unwrap_or(false)
    }

    pub fn stats(&self) -> SourceStats {
        let state = self.state.lock();
        SourceStats {
            publisher_id: state.publisher_id,
            consumer_count: state.consumers.len(),
            gop_messages: state.gop_cache.len(),
            gop_bytes: state.gop_cache.bytes(),
            has_metadata: state.metadata.is_some(),
            has_video_sequence_header: state.video_sequence_header.is_some(),
            has_audio_sequence_header: state.audio_sequence_header.is_some(),
            messages_received: state.messages_received,
        }
    }
}

impl std::fmt::Debug for LiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSource").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::live::jitter::JitterAlgorithm;
    use crate::live::queue::OverflowPolicy;
    use crate::protocol::constants::{MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO};

    fn new_source(settings: VhostSettings) -> Arc<LiveSource> {
        Arc::new(LiveSource::new(
            StreamKey::new("__defaultVhost__", "live", "livestream"),
            settings,
        ))
    }

    /// Unbounded queues and untouched timestamps
    fn raw_settings() -> VhostSettings {
        VhostSettings::default()
            .queue(0, OverflowPolicy::DropOldest)
            .jitter(JitterAlgorithm::Off, 0)
    }

    fn video(timestamp: u32, first: u8, second: u8) -> SharedMessage {
        SharedMessage::new(MSG_VIDEO, timestamp, Bytes::from(vec![first, second, timestamp as u8]))
    }

    fn video_sh() -> SharedMessage {
        video(0, 0x17, 0x00)
    }

    fn keyframe(timestamp: u32) -> SharedMessage {
        video(timestamp, 0x17, 0x01)
    }

    fn inter(timestamp: u32) -> SharedMessage {
        video(timestamp, 0x27, 0x01)
    }

    fn audio(timestamp: u32) -> SharedMessage {
        SharedMessage::new(MSG_AUDIO, timestamp, Bytes::from(vec![0xAF, 0x01, timestamp as u8]))
    }

    fn audio_sh() -> SharedMessage {
        SharedMessage::new(MSG_AUDIO, 0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]))
    }

    fn metadata() -> SharedMessage {
        SharedMessage::new(MSG_DATA_AMF0, 0, Bytes::from_static(b"\x02\x00\x0aonMetaData"))
    }

    fn push(source: &LiveSource, msg: SharedMessage) {
        if msg.is_video() {
            source.on_video(msg);
        } else if msg.is_audio() {
            source.on_audio(msg);
        } else {
            source.on_metadata(msg);
        }
    }

    fn payloads(batch: &[SharedMessage]) -> Vec<Bytes> {
        batch.iter().map(|m| m.payload().clone()).collect()
    }

    #[test]
    fn test_fan_out_preserves_order() {
        let source = new_source(raw_settings());
        source.on_publish(1).unwrap();

        let consumers: Vec<Consumer> = (0..3).map(|_| source.create_consumer()).collect();

        let sent = vec![
            metadata(),
            video_sh(),
            audio_sh(),
            keyframe(0),
            audio(10),
            inter(33),
            audio(30),
            inter(66),
        ];
        for msg in &sent {
            push(&source, msg.clone());
        }

        for consumer in &consumers {
            let received = consumer.dump_packets(100);
            assert_eq!(payloads(&received), payloads(&sent));
            // Fan-out shares the payload, it does not copy it
            for (got, original) in received.iter().zip(&sent) {
                assert!(got.shares_payload(original));
            }
        }
    }

    #[test]
    fn test_gop_replay_starts_at_latest_keyframe() {
        let source = new_source(raw_settings());
        source.on_publish(1).unwrap();

        let sh = video_sh();
        let kf2 = keyframe(132);
        let d3 = inter(165);
        for msg in [
            sh.clone(),
            keyframe(0),
            inter(33),
            inter(66),
            kf2.clone(),
            d3.clone(),
        ] {
            push(&source, msg);
        }

        let consumer = source.create_consumer();
        assert_eq!(payloads(&consumer.dump_packets(100)), payloads(&[sh, kf2, d3]));
    }

    #[test]
    fn test_replay_order() {
        let source = new_source(raw_settings());
        source.on_publish(1).unwrap();

        let meta = metadata();
        let vsh = video_sh();
        let ash = audio_sh();
        let kf = keyframe(0);
        let a = audio(20);

        // Arrival order differs from replay order
        for msg in [ash.clone(), kf.clone(), vsh.clone(), a.clone(), meta.clone()] {
            push(&source, msg);
        }

        let consumer = source.create_consumer();
        assert_eq!(
            payloads(&consumer.dump_packets(100)),
            payloads(&[meta, vsh, ash, kf, a])
        );
    }

    #[test]
    fn test_aac_scenario() {
        let source = new_source(VhostSettings::default());
        source.on_publish(1).unwrap();
        let consumer = source.create_consumer();

        source.on_audio(audio_sh());
        for ts in [0, 40, 80] {
            source.on_audio(audio(ts));
        }

        let received = consumer.dump_packets(100);
        assert_eq!(received.len(), 4);
        assert!(received[0].is_sequence_header());
        let timestamps: Vec<u32> = received[1..].iter().map(|m| m.timestamp()).collect();
        assert_eq!(timestamps, vec![0, 40, 80]);
    }

    #[test]
    fn test_oversized_gop_still_replays_headers() {
        let source = new_source(
            VhostSettings::default()
                .queue(4, OverflowPolicy::DropOldest)
                .jitter(JitterAlgorithm::Off, 0),
        );
        source.on_publish(1).unwrap();

        let vsh = video_sh();
        let ash = audio_sh();
        push(&source, vsh.clone());
        push(&source, ash.clone());
        push(&source, keyframe(0));
        for ts in [33, 66, 99, 132, 165] {
            push(&source, inter(ts));
        }

        let consumer = source.create_consumer();
        let replayed = consumer.dump_packets(100);
        assert_eq!(payloads(&replayed), payloads(&[vsh.clone(), ash.clone()]));

        // Playback resumes at the next keyframe, headers still first
        let kf = keyframe(198);
        push(&source, kf.clone());
        assert_eq!(payloads(&consumer.dump_packets(100)), payloads(&[kf]));

        // Live overflow evicts frames, never the codec parameters
        for ts in [231, 264, 297, 330, 363] {
            push(&source, inter(ts));
        }
        let live = consumer.dump_packets(100);
        assert_eq!(live.len(), 4);
        assert!(live.iter().all(|m| !m.is_sequence_header()));
        assert_eq!(live.last().unwrap().timestamp(), 363);

        push(&source, vsh.clone());
        for ts in [396, 429, 462, 495] {
            push(&source, inter(ts));
        }
        let live = consumer.dump_packets(100);
        assert_eq!(live.len(), 4);
        assert!(live[0].shares_payload(&vsh));
    }

    #[test]
    fn test_consumer_isolation() {
        let source = new_source(raw_settings());
        source.on_publish(1).unwrap();
        push(&source, video_sh());
        push(&source, keyframe(0));

        let a = source.create_consumer();
        let b = source.create_consumer();
        push(&source, inter(33));

        let before = source.stats();
        drop(a);

        let after = source.stats();
        assert_eq!(after.consumer_count, 1);
        assert_eq!(after.gop_messages, before.gop_messages);
        assert_eq!(after.has_video_sequence_header, before.has_video_sequence_header);

        assert_eq!(b.queue_len(), 3);
        let got = b.dump_packets(100);
        assert_eq!(got.iter().map(|m| m.timestamp()).collect::<Vec<_>>(), vec![0, 0, 33]);
    }

    #[test]
    fn test_second_publisher_rejected() {
        let source = new_source(raw_settings());
        source.on_publish(1).unwrap();

        let err = source.on_publish(2).unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
        assert_eq!(source.stats().publisher_id, Some(1));

        // Only the owner can unpublish
        source.on_unpublish(2);
        assert!(source.is_publishing());
        source.on_unpublish(1);
        assert!(!source.is_publishing());
        source.on_publish(2).unwrap();
    }

    #[test]
    fn test_unpublish_keeps_headers_and_clears_gop() {
        let source = new_source(raw_settings());
        source.on_publish(1).unwrap();
        push(&source, metadata());
        push(&source, video_sh());
        push(&source, keyframe(0));
        source.on_unpublish(1);

        let stats = source.stats();
        assert!(stats.has_metadata);
        assert!(stats.has_video_sequence_header);
        assert_eq!(stats.gop_messages, 0);

        // Nothing is replayed without a publisher
        let idle = source.create_consumer();
        assert_eq!(idle.queue_len(), 0);

        // Headers come back on republish
        source.on_publish(2).unwrap();
        let consumer = source.create_consumer();
        assert_eq!(consumer.queue_len(), 2);
    }

    #[test]
    fn test_clear_headers_on_publish() {
        let source = new_source(raw_settings().clear_headers_on_publish(true));
        source.on_publish(1).unwrap();
        push(&source, video_sh());
        source.on_unpublish(1);

        source.on_publish(2).unwrap();
        assert!(!source.stats().has_video_sequence_header);
    }

    #[test]
    fn test_gop_cache_disabled_still_replays_headers() {
        let source = new_source(raw_settings().disable_gop_cache());
        source.on_publish(1).unwrap();
        push(&source, video_sh());
        push(&source, audio_sh());
        push(&source, keyframe(0));
        push(&source, inter(33));

        let consumer = source.create_consumer();
        let replay = consumer.dump_packets(100);
        assert_eq!(replay.len(), 2);
        assert!(replay.iter().all(SharedMessage::is_sequence_header));
    }

    #[test]
    fn test_idle_tracking() {
        let source = new_source(raw_settings());
        assert!(source.is_expired(Duration::ZERO));

        source.on_publish(1).unwrap();
        assert!(!source.is_expired(Duration::ZERO));

        let consumer = source.create_consumer();
        source.on_unpublish(1);
        assert!(!source.is_expired(Duration::ZERO));

        drop(consumer);
        assert!(source.is_expired(Duration::ZERO));
        assert!(!source.is_expired(Duration::from_secs(3600)));
    }
}
