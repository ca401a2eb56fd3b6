//! AMF0 encoder and decoder
//!
//! Markers handled:
//! ```text
//! 0x00 Number        0x01 Boolean      0x02 String       0x03 Object
//! 0x05 Null          0x06 Undefined    0x07 Reference    0x08 ECMA array
//! 0x09 Object end    0x0A Strict array 0x0B Date         0x0C Long string
//! 0x0D Unsupported   0x0F XML          0x10 Typed object
//! ```
//! AVM+ (0x11) and the reserved markers are rejected.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

pub(crate) const MARKER_NUMBER: u8 = 0x00;
pub(crate) const MARKER_BOOLEAN: u8 = 0x01;
pub(crate) const MARKER_STRING: u8 = 0x02;
pub(crate) const MARKER_OBJECT: u8 = 0x03;
pub(crate) const MARKER_NULL: u8 = 0x05;
pub(crate) const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
pub(crate) const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;

/// Nesting bound for objects and arrays
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 decoder
///
/// One decoder per command payload; the reference table is scoped to it.
#[derive(Default)]
pub struct Amf0Decoder {
    references: Vec<AmfValue>,
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a single value, advancing `buf` past it
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let marker = buf.get_u8();
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode values until the buffer is exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => Ok(AmfValue::Number(read_f64(buf)?)),
            MARKER_BOOLEAN => {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
            MARKER_LONG_STRING => Ok(AmfValue::String(read_utf8_long(buf)?)),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            MARKER_OBJECT => {
                let slot = self.reserve_reference();
                let props = self.read_properties(buf)?;
                Ok(self.fill_reference(slot, AmfValue::Object(props)))
            }
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                // count is advisory; the terminator is authoritative
                let _count = buf.get_u32();
                let slot = self.reserve_reference();
                let props = self.read_properties(buf)?;
                Ok(self.fill_reference(slot, AmfValue::EcmaArray(props)))
            }
            MARKER_TYPED_OBJECT => {
                let class_name = read_utf8(buf)?;
                let slot = self.reserve_reference();
                let properties = self.read_properties(buf)?;
                Ok(self.fill_reference(
                    slot,
                    AmfValue::TypedObject {
                        class_name,
                        properties,
                    },
                ))
            }
            MARKER_STRICT_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEof);
                }
                let count = buf.get_u32() as usize;
                let slot = self.reserve_reference();
                let mut elements = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    elements.push(self.decode(buf)?);
                }
                Ok(self.fill_reference(slot, AmfValue::StrictArray(elements)))
            }
            MARKER_DATE => {
                let millis = read_f64(buf)?;
                if buf.remaining() < 2 {
                    return Err(AmfError::UnexpectedEof);
                }
                let _timezone = buf.get_i16();
                Ok(AmfValue::Date(millis))
            }
            MARKER_REFERENCE => {
                if buf.remaining() < 2 {
                    return Err(AmfError::UnexpectedEof);
                }
                let index = buf.get_u16();
                self.references
                    .get(index as usize)
                    .cloned()
                    .ok_or(AmfError::InvalidReference(index))
            }
            MARKER_XML_DOCUMENT => Ok(AmfValue::Xml(read_utf8_long(buf)?)),
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    /// Key/value pairs up to the `00 00 09` terminator.
    ///
    /// A payload that ends right after the empty key is accepted: several
    /// encoders drop the trailing 0x09 on the last object of a message.
    fn read_properties(&mut self, buf: &mut Bytes) -> Result<AmfObject, AmfError> {
        let mut props = AmfObject::new();
        loop {
            let key = read_utf8(buf)?;
            if key.is_empty() {
                if buf.is_empty() {
                    break;
                }
                if buf.get_u8() != MARKER_OBJECT_END {
                    return Err(AmfError::InvalidObjectEnd);
                }
                break;
            }
            let value = self.decode(buf)?;
            props.insert(key, value);
        }
        Ok(props)
    }

    fn reserve_reference(&mut self) -> usize {
        self.references.push(AmfValue::Null);
        self.references.len() - 1
    }

    fn fill_reference(&mut self, slot: usize, value: AmfValue) -> AmfValue {
        self.references[slot] = value.clone();
        value
    }
}

fn read_f64(buf: &mut Bytes) -> Result<f64, AmfError> {
    if buf.remaining() < 8 {
        return Err(AmfError::UnexpectedEof);
    }
    Ok(buf.get_f64())
}

fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    take_utf8(buf, len)
}

fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 4 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u32() as usize;
    take_utf8(buf, len)
}

fn take_utf8(buf: &mut Bytes, len: usize) -> Result<String, AmfError> {
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    let raw = buf.split_to(len);
    std::str::from_utf8(&raw)
        .map(str::to_owned)
        .map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder writing into a growable buffer
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes, leaving the encoder empty
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(*b as u8);
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                if s.len() > u16::MAX as usize {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            AmfValue::TypedObject {
                class_name,
                properties,
            } => {
                self.buf.put_u8(MARKER_TYPED_OBJECT);
                self.write_key(class_name);
                self.write_properties(properties);
            }
            AmfValue::StrictArray(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
            AmfValue::Date(millis) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*millis);
                self.buf.put_i16(0);
            }
            AmfValue::Xml(s) => {
                self.buf.put_u8(MARKER_XML_DOCUMENT);
                self.buf.put_u32(s.len() as u32);
                self.buf.put_slice(s.as_bytes());
            }
        }
    }

    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    fn write_properties(&mut self, props: &AmfObject) {
        for (key, val) in props.iter() {
            self.write_key(key);
            self.encode(val);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    /// Unmarked UTF-8 with a 16-bit length; longer keys are truncated
    fn write_key(&mut self, s: &str) {
        let mut len = s.len().min(u16::MAX as usize);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a sequence of values into one payload
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Decode every value in a payload
pub fn decode_all(data: &Bytes) -> Result<Vec<AmfValue>, AmfError> {
    let mut buf = data.clone();
    Amf0Decoder::new().decode_all(&mut buf)
}
