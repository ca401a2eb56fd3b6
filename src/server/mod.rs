//! RTMP server implementation
//!
//! This module provides the server-side glue between sockets and the live
//! core:
//! - TCP listener for accepting connections
//! - Per-connection session (publish loop and play loop)
//! - Handler trait for application callbacks

pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use connection::Connection;
pub use handler::{AuthResult, LoggingHandler, RtmpHandler, SessionContext};
pub use listener::RtmpServer;
