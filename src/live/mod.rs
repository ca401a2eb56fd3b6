//! Live streaming core: sources, consumers and the registry that ties a
//! stream URL to its source
//!
//! ```text
//!                       Arc<SourceRegistry>
//!                  ┌──────────────────────────┐
//!                  │ StreamKey → LiveSource   │
//!                  └────────────┬─────────────┘
//!                               │
//!      publisher ──► LiveSource (headers, GopCache)
//!                               │ fan-out
//!            ┌──────────────────┼──────────────────┐
//!            ▼                  ▼                  ▼
//!        Consumer           Consumer           Consumer
//!   wait / dump_packets   (own queue + jitter per player)
//! ```

pub mod config;
pub mod consumer;
pub mod jitter;
pub mod message;
pub mod queue;
pub mod registry;
pub mod source;

pub use config::{LiveConfig, VhostConfig, VhostSettings};
pub use consumer::Consumer;
pub use jitter::{Jitter, JitterAlgorithm};
pub use message::SharedMessage;
pub use queue::{MessageQueue, OverflowPolicy};
pub use registry::{SourceRegistry, StreamKey};
pub use source::{LiveSource, SourceStats};
