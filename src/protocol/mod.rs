//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Handshake (C0C1C2/S0S1S2 exchange, simple and complex)
//! - Chunk stream multiplexing and demultiplexing
//! - Typed packet encoding and decoding

pub mod buffer;
pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use buffer::FastBuffer;
pub use chunk::{ChunkDecoder, ChunkEncoder, MessageHeader, RtmpMessage};
pub use handshake::{client_handshake, server_handshake, Handshake, HandshakeMode, HandshakeRole};
pub use message::{Command, ConnectParams, DataMessage, Packet, UserControlEvent};
