//! Unified error types for rtmp-live
//!
//! Parsing and codec layers return these errors with enough context to log;
//! only the connection loop turns an error into "close this connection".
//! Source and consumer mutations never fail in the steady state.

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all RTMP operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Request rejected (publish conflict, handler refusal)
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Connection was closed by the peer
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl Error {
    /// Whether the connection that produced this error must be torn down.
    ///
    /// Every error that reaches a connection loop is fatal for that
    /// connection; `Rejected` is the one case where the peer was already
    /// told why and the close is orderly.
    pub fn is_fatal_for_connection(&self) -> bool {
        !matches!(self, Error::Config(_))
    }

    /// Whether this error is a plain disconnect rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Rejected(msg) => write!(f, "Rejected: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Amf(e) => Some(e),
            Error::Handshake(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Protocol-level errors (chunk stream and message codec)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Basic header resolved to an impossible chunk stream id
    InvalidChunkStreamId(u32),
    /// Message header could not be interpreted
    InvalidChunkHeader,
    /// A chunk format that is not legal in the current chunk stream state
    UnexpectedChunkFormat { csid: u32, fmt: u8 },
    /// Declared payload length exceeds the sanity limit
    MessageTooLarge { size: u32, max: u32 },
    /// SetChunkSize outside the accepted range
    InvalidChunkSize(u32),
    /// A control message payload is shorter than its fixed layout
    MalformedControl { message_type: u8, len: usize },
    /// Command payload did not match the expected schema
    InvalidCommand(String),
    /// A required command field is absent
    MissingField(String),
    /// Command addressed to a stream id that was never created
    StreamNotFound(u32),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkStreamId(id) => write!(f, "Invalid chunk stream ID: {}", id),
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::UnexpectedChunkFormat { csid, fmt } => {
                write!(f, "Unexpected chunk format {} on chunk stream {}", fmt, csid)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidChunkSize(size) => write!(f, "Invalid chunk size: {}", size),
            ProtocolError::MalformedControl { message_type, len } => write!(
                f,
                "Malformed control message type {} ({} bytes)",
                message_type, len
            ),
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
            ProtocolError::MissingField(field) => write!(f, "Missing required field: {}", field),
            ProtocolError::StreamNotFound(id) => write!(f, "Stream not found: {}", id),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    InvalidReference(u16),
    NestingTooDeep,
    InvalidObjectEnd,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::InvalidReference(idx) => write!(f, "Invalid AMF reference: {}", idx),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
            AmfError::InvalidObjectEnd => write!(f, "Invalid object end marker"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// C0/S0 carried a version we do not speak
    InvalidVersion(u8),
    /// Complex handshake digest did not validate (callers fall back to simple)
    DigestMismatch,
    /// Operation not legal in the current handshake state
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::DigestMismatch => write!(f, "Handshake digest mismatch"),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
        }
    }
}

impl std::error::Error for HandshakeError {}
