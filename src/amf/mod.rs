//! AMF0 serialization
//!
//! Command, status and metadata messages carry AMF0-encoded values.
//! Objects preserve insertion order so replies go out the way they were built.

pub mod amf0;
pub mod value;

pub use amf0::{decode_all, encode_all, Amf0Decoder, Amf0Encoder};
pub use value::{AmfObject, AmfValue};
