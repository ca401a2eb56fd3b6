//! Media handling for RTMP
//!
//! This module provides:
//! - FLV tag-byte inspection (sequence headers, keyframes, codec ids)
//! - GOP caching for fast-start playback

pub mod flv;
pub mod gop;

pub use flv::{AudioFormat, VideoCodec, VideoFrameType};
pub use gop::GopCache;
