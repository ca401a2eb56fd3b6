//! rtmp-live: RTMP live streaming core
//!
//! This library provides the pieces of a live RTMP origin:
//! - Chunk stream demultiplexer/multiplexer and the RTMP message codec
//! - AMF0 values for commands, status replies and metadata
//! - Simple and complex (digest) handshakes, with automatic fallback
//! - Live sources with sequence-header and GOP caching for fast start
//! - Per-player consumers with bounded queues and timestamp correction
//! - An explicit source registry and a tokio server gluing it together
//!
//! # Example: Simple Server
//!
//! ```no_run
//! use rtmp_live::{AuthResult, RtmpHandler, RtmpServer, ServerConfig, SessionContext, StreamKey};
//!
//! struct MyHandler;
//!
//! #[async_trait::async_trait]
//! impl RtmpHandler for MyHandler {
//!     async fn on_publish(&self, _ctx: &SessionContext, key: &StreamKey) -> AuthResult {
//!         println!("Stream published: {}", key);
//!         AuthResult::Accept
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RtmpServer::new(ServerConfig::default(), MyHandler);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod error;
pub mod live;
pub mod media;
pub mod protocol;
pub mod server;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use live::{
    Consumer, JitterAlgorithm, LiveConfig, LiveSource, OverflowPolicy, SharedMessage,
    SourceRegistry, SourceStats, StreamKey, VhostConfig, VhostSettings,
};
pub use server::{AuthResult, RtmpHandler, RtmpServer, ServerConfig, SessionContext};
