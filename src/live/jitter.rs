//! Per-consumer timestamp correction
//!
//! Publishers produce timestamps that jump backwards after a reconnect,
//! leap forward after a stall, or wrap at 2^32. A player expects a
//! monotonic clock, so each consumer rewrites timestamps before sending.

use crate::live::message::SharedMessage;

/// Step used when a forward jump is too large to trust
pub const DEFAULT_FRAME_TIME_MS: u32 = 10;

/// Default bound on a single forward step
pub const DEFAULT_MAX_JUMP_MS: u32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterAlgorithm {
    /// Monotonic output with bounded steps
    #[default]
    Full,
    /// Every timestamp becomes 0
    Zero,
    /// Timestamps pass through untouched
    Off,
}

/// Jitter state for one consumer
#[derive(Debug)]
pub struct Jitter {
    algorithm: JitterAlgorithm,
    max_jump_ms: u32,
    /// Last timestamp seen from the publisher
    last_pkt_time: Option<u32>,
    /// Last timestamp handed to the player
    last_pkt_correct_time: u32,
}

impl Jitter {
    pub fn new(algorithm: JitterAlgorithm, max_jump_ms: u32) -> Self {
        Self {
            algorithm,
            max_jump_ms,
            last_pkt_time: None,
            last_pkt_correct_time: 0,
        }
    }

    pub fn algorithm(&self) -> JitterAlgorithm {
        self.algorithm
    }

    /// Last corrected timestamp
    pub fn time(&self) -> u32 {
        self.last_pkt_correct_time
    }

    /// Rewrite `msg.header.timestamp` in place
    pub fn correct(&mut self, msg: &mut SharedMessage) {
        match self.algorithm {
            JitterAlgorithm::Off => {}
            JitterAlgorithm::Zero => msg.header.timestamp = 0,
            JitterAlgorithm::Full => {
                // Metadata carries no timing
                if !msg.is_av() {
                    msg.header.timestamp = 0;
                    return;
                }

                let time = msg.header.timestamp;
                let step = match self.last_pkt_time {
                    // The stream starts at zero for every consumer
                    None => 0,
                    Some(last) => {
                        let delta = time as i64 - last as i64;
                        if delta < 0 {
                            0
                        } else if delta > self.max_jump_ms as i64 {
                            DEFAULT_FRAME_TIME_MS.min(self.max_jump_ms)
                        } else {
                            delta as u32
                        }
                    }
                };

                self.last_pkt_correct_time = self.last_pkt_correct_time.saturating_add(step);
                self.last_pkt_time = Some(time);
                msg.header.timestamp = self.last_pkt_correct_time;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::protocol::constants::{MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO};

    fn corrected(jitter: &mut Jitter, message_type: u8, timestamp: u32) -> u32 {
        let mut msg = SharedMessage::new(message_type, timestamp, Bytes::from_static(&[0x27]));
        jitter.correct(&mut msg);
        msg.timestamp()
    }

    #[test]
    fn test_full_passes_regular_deltas() {
        let mut jitter = Jitter::new(JitterAlgorithm::Full, DEFAULT_MAX_JUMP_MS);
        let out: Vec<u32> = [1000, 1040, 1080, 1120]
            .iter()
            .map(|ts| corrected(&mut jitter, MSG_AUDIO, *ts))
            .collect();
        assert_eq!(out, vec![0, 40, 80, 120]);
    }

    #[test]
    fn test_full_is_monotonic_and_bounded() {
        let max_jump = 100;
        let mut jitter = Jitter::new(JitterAlgorithm::Full, max_jump);
        let input = [
            0u32, 33, 66, 20, 5000, 5033, 4000, 4033, 0xFFFF_FFF0, 0x10, 0x40, 7, 7, 90,
        ];

        let mut previous = None;
        for ts in input {
            let out = corrected(&mut jitter, MSG_VIDEO, ts);
            if let Some(prev) = previous {
                assert!(out >= prev, "{} went backwards to {}", prev, out);
                assert!(out - prev <= max_jump);
            }
            previous = Some(out);
        }
    }

    #[test]
    fn test_full_large_jump_uses_frame_step() {
        let mut jitter = Jitter::new(JitterAlgorithm::Full, DEFAULT_MAX_JUMP_MS);
        corrected(&mut jitter, MSG_VIDEO, 0);
        assert_eq!(corrected(&mut jitter, MSG_VIDEO, 60_000), DEFAULT_FRAME_TIME_MS);
        assert_eq!(corrected(&mut jitter, MSG_VIDEO, 60_040), DEFAULT_FRAME_TIME_MS + 40);
    }

    #[test]
    fn test_full_zeroes_metadata() {
        let mut jitter = Jitter::new(JitterAlgorithm::Full, DEFAULT_MAX_JUMP_MS);
        corrected(&mut jitter, MSG_VIDEO, 0);
        corrected(&mut jitter, MSG_VIDEO, 40);
        assert_eq!(corrected(&mut jitter, MSG_DATA_AMF0, 40), 0);
        assert_eq!(jitter.time(), 40);
    }

    #[test]
    fn test_zero_and_off() {
        let mut zero = Jitter::new(JitterAlgorithm::Zero, DEFAULT_MAX_JUMP_MS);
        assert_eq!(corrected(&mut zero, MSG_VIDEO, 1234), 0);

        let mut off = Jitter::new(JitterAlgorithm::Off, DEFAULT_MAX_JUMP_MS);
        assert_eq!(corrected(&mut off, MSG_VIDEO, 1234), 1234);
        assert_eq!(corrected(&mut off, MSG_VIDEO, 10), 10);
    }
}
