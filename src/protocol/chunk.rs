//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks so several message streams can share
//! one connection. Each chunk carries a basic header naming its chunk stream,
//! a message header whose size depends on `fmt`, and up to `chunk_size`
//! payload bytes.
//!
//! ```text
//! +--------------+-----------------+--------------------+------------+
//! | Basic header | Message header  | Extended timestamp | Chunk data |
//! | 1-3 bytes    | 11 / 7 / 3 / 0  | 0 or 4 bytes       | <= chunk   |
//! +--------------+-----------------+--------------------+------------+
//!
//! Basic header:
//!   fmt(2) | csid(6)            csid 2-63
//!   fmt(2) | 0 | b             csid = 64 + b
//!   fmt(2) | 1 | b0 b1         csid = 64 + b0 + b1 * 256
//!
//! Message header:
//!   fmt 0: timestamp(3) length(3) type(1) stream_id(4, little-endian)
//!   fmt 1: delta(3) length(3) type(1)
//!   fmt 2: delta(3)
//!   fmt 3: nothing, everything repeats
//! ```
//!
//! A 3-byte timestamp field of `0xFFFFFF` means a 4-byte absolute timestamp
//! follows the message header, for every format.
//!
//! The decoder is sans-IO: it inspects a `BytesMut` and only consumes a
//! chunk once all of its bytes are present.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::protocol::buffer::ByteReader;
use crate::protocol::constants::*;

/// Header fields shared by every chunk of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: u8,
    pub payload_length: u32,
    /// Absolute timestamp in milliseconds, wraps at 2^32
    pub timestamp: u32,
    /// Message stream id (not the chunk stream id)
    pub stream_id: u32,
}

impl MessageHeader {
    pub fn new(message_type: u8, timestamp: u32, stream_id: u32) -> Self {
        Self {
            message_type,
            payload_length: 0,
            timestamp,
            stream_id,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.message_type == MSG_AUDIO
    }

    pub fn is_video(&self) -> bool {
        self.message_type == MSG_VIDEO
    }

    pub fn is_av(&self) -> bool {
        self.is_audio() || self.is_video()
    }

    pub fn is_data(&self) -> bool {
        matches!(self.message_type, MSG_DATA_AMF0 | MSG_DATA_AMF3)
    }
}

/// A complete message, reassembled from chunks or ready to be chunked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpMessage {
    /// Chunk stream the message travelled on
    pub csid: u32,
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl RtmpMessage {
    /// Build an outgoing message; `payload_length` follows the payload
    pub fn new(csid: u32, mut header: MessageHeader, payload: Bytes) -> Self {
        header.payload_length = payload.len() as u32;
        Self {
            csid,
            header,
            payload,
        }
    }
}

/// Per-csid header state reused by fmt 1-3 chunks
#[derive(Debug, Clone, Copy, Default)]
struct HeaderState {
    header: MessageHeader,
    /// Last 3-byte timestamp field (absolute for fmt 0, delta otherwise)
    timestamp_delta: u32,
    extended_timestamp: bool,
}

#[derive(Debug, Default)]
struct ChunkStream {
    state: HeaderState,
    /// Message being assembled; owned here until complete
    partial: Option<BytesMut>,
    messages: u64,
}

enum ChunkOutcome {
    NeedMore,
    Partial,
    Complete(RtmpMessage),
}

/// Evaluate to the value or report that more input is needed
macro_rules! need {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(ChunkOutcome::NeedMore),
        }
    };
}

/// Chunk stream demultiplexer
pub struct ChunkDecoder {
    chunk_size: u32,
    max_message_size: u32,
    streams: HashMap<u32, ChunkStream>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Apply a peer's SetChunkSize; the top bit is reserved and ignored
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        let size = size & 0x7FFF_FFFF;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&size) {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn set_max_message_size(&mut self, max: u32) {
        self.max_message_size = max;
    }

    /// Discard the partially assembled message on `csid`
    pub fn abort(&mut self, csid: u32) {
        if let Some(stream) = self.streams.get_mut(&csid) {
            if stream.partial.take().is_some() {
                tracing::debug!(csid = csid, "Aborted partial message");
            }
        }
    }

    /// Bytes assembled so far for the in-progress message on `csid`
    pub fn partial_len(&self, csid: u32) -> Option<usize> {
        self.streams
            .get(&csid)
            .and_then(|s| s.partial.as_ref())
            .map(|p| p.len())
    }

    /// Decode the next complete message.
    ///
    /// Consumes as many whole chunks as are buffered. `Ok(None)` means the
    /// remaining bytes do not yet form a complete chunk; nothing of that
    /// chunk has been consumed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpMessage>> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkOutcome::NeedMore => return Ok(None),
                ChunkOutcome::Partial => continue,
                ChunkOutcome::Complete(msg) => return Ok(Some(msg)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkOutcome> {
        let mut r = ByteReader::new(&buf[..]);

        let first = need!(r.read_u8());
        let fmt = first >> 6;
        let csid = match first & 0x3F {
            0 => 64 + need!(r.read_u8()) as u32,
            1 => {
                let b0 = need!(r.read_u8()) as u32;
                let b1 = need!(r.read_u8()) as u32;
                64 + b0 + b1 * 256
            }
            n => n as u32,
        };
        if !(2..=MAX_CSID).contains(&csid) {
            return Err(ProtocolError::InvalidChunkStreamId(csid).into());
        }

        let existing = self.streams.get(&csid);
        let fresh = existing.is_none();
        let in_progress = existing.and_then(|s| s.partial.as_ref()).map(|p| p.len());
        let mut state = existing.map(|s| s.state).unwrap_or_default();
        let first_of_message = in_progress.is_none();

        if fresh && fmt > 1 {
            return Err(ProtocolError::UnexpectedChunkFormat { csid, fmt }.into());
        }
        if !first_of_message && fmt == 0 {
            return Err(ProtocolError::UnexpectedChunkFormat { csid, fmt }.into());
        }

        if fmt <= 2 {
            let field = need!(r.read_u24());
            state.timestamp_delta = field;
            state.extended_timestamp = field >= EXTENDED_TIMESTAMP_THRESHOLD;
            if !state.extended_timestamp {
                state.header.timestamp = if fmt == 0 {
                    field
                } else {
                    state.header.timestamp.wrapping_add(field)
                };
            }

            if fmt <= 1 {
                let length = need!(r.read_u24());
                let message_type = need!(r.read_u8());
                if !first_of_message && length != state.header.payload_length {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                state.header.payload_length = length;
                state.header.message_type = message_type;
                if fmt == 0 {
                    state.header.stream_id = need!(r.read_u32_le());
                }
            }
        } else if first_of_message && !state.extended_timestamp {
            state.header.timestamp = state.header.timestamp.wrapping_add(state.timestamp_delta);
        }

        if state.extended_timestamp {
            let extended = need!(r.peek_u32());
            // Some encoders omit the field on continuation chunks; only
            // consume it when it repeats the message's timestamp.
            let omitted = fmt == 3 && !first_of_message && extended != state.header.timestamp;
            if !omitted {
                r.skip(4);
                state.header.timestamp = extended;
            }
        }

        let length = state.header.payload_length;
        if length > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: self.max_message_size,
            }
            .into());
        }

        let assembled = in_progress.unwrap_or(0);
        let take = (length as usize - assembled).min(self.chunk_size as usize);
        let header_len = r.position();
        if buf.len() < header_len + take {
            return Ok(ChunkOutcome::NeedMore);
        }

        // Whole chunk present: commit
        buf.advance(header_len);
        let data = buf.split_to(take);

        if fresh && fmt == 1 {
            tracing::debug!(csid = csid, "Fresh chunk stream started with fmt 1");
        }

        let stream = self.streams.entry(csid).or_default();
        stream.state = state;
        let partial = stream
            .partial
            .get_or_insert_with(|| BytesMut::with_capacity(length as usize));
        partial.extend_from_slice(&data);

        if partial.len() < length as usize {
            return Ok(ChunkOutcome::Partial);
        }

        let payload = stream.partial.take().unwrap_or_default().freeze();
        stream.messages += 1;

        tracing::trace!(
            csid = csid,
            message_type = state.header.message_type,
            timestamp = state.header.timestamp,
            length = length,
            "Message reassembled"
        );

        Ok(ChunkOutcome::Complete(RtmpMessage {
            csid,
            header: state.header,
            payload,
        }))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk stream multiplexer
///
/// Picks the smallest header format the decoder can expand back to the
/// same header.
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, HeaderState>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Outgoing chunk size; the caller must announce it with SetChunkSize
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Append `msg` to `buf` as one or more chunks
    pub fn encode(&mut self, msg: &RtmpMessage, buf: &mut BytesMut) {
        let csid = msg.csid;
        let length = msg.payload.len() as u32;
        let timestamp = msg.header.timestamp;

        let previous = self.streams.get(&csid).copied();
        let fmt = select_format(msg, previous.as_ref());
        let base = previous.map(|p| p.header.timestamp).unwrap_or(0);

        let field = if fmt == 0 {
            timestamp
        } else {
            timestamp.wrapping_sub(base)
        };

        let mut state = previous.unwrap_or_default();
        if fmt != 3 {
            state.extended_timestamp = field >= EXTENDED_TIMESTAMP_THRESHOLD;
            state.timestamp_delta = field.min(EXTENDED_TIMESTAMP_THRESHOLD);
        }
        state.header = MessageHeader {
            message_type: msg.header.message_type,
            payload_length: length,
            timestamp,
            stream_id: msg.header.stream_id,
        };
        self.streams.insert(csid, state);

        let chunk_size = self.chunk_size as usize;
        let mut offset = 0;
        loop {
            let first = offset == 0;
            write_basic_header(csid, if first { fmt } else { 3 }, buf);

            if first {
                match fmt {
                    0 => {
                        write_u24(state.timestamp_delta, buf);
                        write_u24(length, buf);
                        buf.put_u8(msg.header.message_type);
                        buf.put_u32_le(msg.header.stream_id);
                    }
                    1 => {
                        write_u24(state.timestamp_delta, buf);
                        write_u24(length, buf);
                        buf.put_u8(msg.header.message_type);
                    }
                    2 => write_u24(state.timestamp_delta, buf),
                    _ => {}
                }
            }

            if state.extended_timestamp {
                buf.put_u32(timestamp);
            }

            let end = (offset + chunk_size).min(msg.payload.len());
            buf.put_slice(&msg.payload[offset..end]);
            offset = end;

            if offset >= msg.payload.len() {
                break;
            }
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn select_format(msg: &RtmpMessage, previous: Option<&HeaderState>) -> u8 {
    let Some(prev) = previous else {
        return 0;
    };

    if msg.header.stream_id != prev.header.stream_id {
        return 0;
    }

    // Backwards jumps restart from an absolute timestamp
    if msg.header.timestamp < prev.header.timestamp {
        return 0;
    }

    if msg.header.message_type != prev.header.message_type
        || msg.payload.len() as u32 != prev.header.payload_length
    {
        return 1;
    }

    let delta = msg.header.timestamp.wrapping_sub(prev.header.timestamp);
    if !prev.extended_timestamp && delta == prev.timestamp_delta {
        return 3;
    }

    2
}

fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        let id = csid - 64;
        buf.put_u8((fmt << 6) | 1);
        buf.put_u8((id & 0xFF) as u8);
        buf.put_u8(((id >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | csid as u8);
    }
}

fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn message(csid: u32, message_type: u8, timestamp: u32, stream_id: u32, len: usize) -> RtmpMessage {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        RtmpMessage::new(
            csid,
            MessageHeader::new(message_type, timestamp, stream_id),
            Bytes::from(payload),
        )
    }

    fn decode_all(decoder: &mut ChunkDecoder, buf: &mut BytesMut) -> Vec<RtmpMessage> {
        let mut out = Vec::new();
        while let Some(msg) = decoder.decode(buf).unwrap() {
            out.push(msg);
        }
        out
    }

    fn roundtrip(messages: &[RtmpMessage], chunk_size: u32) -> Vec<RtmpMessage> {
        let mut encoder = ChunkEncoder::new();
        encoder.set_chunk_size(chunk_size);
        let mut decoder = ChunkDecoder::new();
        decoder.set_chunk_size(chunk_size).unwrap();

        let mut buf = BytesMut::new();
        for msg in messages {
            encoder.encode(msg, &mut buf);
        }
        let decoded = decode_all(&mut decoder, &mut buf);
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn test_roundtrip_across_chunk_sizes() {
        for chunk_size in [128, 129, 1000, 4096, 65536] {
            for len in [0usize, 1, 127, 128, 129, 1000, 70_000] {
                let msg = message(CSID_VIDEO, MSG_VIDEO, 40, 1, len);
                let decoded = roundtrip(std::slice::from_ref(&msg), chunk_size);
                assert_eq!(decoded, vec![msg], "chunk_size={} len={}", chunk_size, len);
            }
        }
    }

    #[test]
    fn test_header_compression_roundtrip() {
        // same length and delta twice -> fmt 3, then fmt 2, then fmt 1
        let messages = vec![
            message(CSID_AUDIO, MSG_AUDIO, 0, 1, 10),
            message(CSID_AUDIO, MSG_AUDIO, 23, 1, 10),
            message(CSID_AUDIO, MSG_AUDIO, 46, 1, 10),
            message(CSID_AUDIO, MSG_AUDIO, 70, 1, 10),
            message(CSID_AUDIO, MSG_AUDIO, 93, 1, 300),
            message(CSID_AUDIO, MSG_VIDEO, 93, 1, 5),
            message(CSID_AUDIO, MSG_VIDEO, 10, 1, 5),
            message(CSID_AUDIO, MSG_VIDEO, 20, 2, 5),
        ];
        assert_eq!(roundtrip(&messages, 128), messages);
    }

    #[test]
    fn test_compressed_formats_are_used() {
        let mut encoder = ChunkEncoder::new();
        let mut buf = BytesMut::new();

        encoder.encode(&message(CSID_AUDIO, MSG_AUDIO, 0, 1, 4), &mut buf);
        assert_eq!(buf[0] >> 6, 0);
        let first_len = buf.len();

        encoder.encode(&message(CSID_AUDIO, MSG_AUDIO, 20, 1, 4), &mut buf);
        assert_eq!(buf[first_len] >> 6, 2);
        let second_len = buf.len();

        encoder.encode(&message(CSID_AUDIO, MSG_AUDIO, 40, 1, 4), &mut buf);
        assert_eq!(buf[second_len] >> 6, 3);
        assert_eq!(buf.len() - second_len, 1 + 4);
    }

    #[test]
    fn test_basic_header_forms() {
        for csid in [2, 63, 64, 319, 320, 65_599] {
            let msg = message(csid, MSG_COMMAND_AMF0, 0, 0, 300);
            let mut encoder = ChunkEncoder::new();
            let mut buf = BytesMut::new();
            encoder.encode(&msg, &mut buf);

            let expected_len = match csid {
                2..=63 => 1,
                64..=319 => 2,
                _ => 3,
            };
            match expected_len {
                1 => assert_eq!(buf[0] & 0x3F, csid as u8),
                2 => assert_eq!(buf[0] & 0x3F, 0),
                _ => assert_eq!(buf[0] & 0x3F, 1),
            }

            let mut decoder = ChunkDecoder::new();
            assert_eq!(decoder.decode(&mut buf).unwrap(), Some(msg));
        }
    }

    #[test]
    fn test_stream_id_is_little_endian() {
        let msg = message(CSID_VIDEO, MSG_VIDEO, 0, 1, 0);
        let mut buf = BytesMut::new();
        ChunkEncoder::new().encode(&msg, &mut buf);

        assert_eq!(&buf[8..12], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_extended_timestamp_roundtrip() {
        for ts in [0xFF_FFFE, 0xFF_FFFF, 0x0100_0000, 0x1234_5678, u32::MAX] {
            let msg = message(CSID_VIDEO, MSG_VIDEO, ts, 1, 400);
            let decoded = roundtrip(std::slice::from_ref(&msg), 128);
            assert_eq!(decoded[0].header.timestamp, ts);
            assert_eq!(decoded[0].payload, msg.payload);
        }
    }

    #[test]
    fn test_extended_delta_roundtrip() {
        let messages = vec![
            message(CSID_VIDEO, MSG_VIDEO, 10, 1, 300),
            message(CSID_VIDEO, MSG_VIDEO, 10 + 0x0100_0000, 1, 300),
            message(CSID_VIDEO, MSG_VIDEO, 20 + 0x0100_0000, 1, 300),
            message(CSID_VIDEO, MSG_VIDEO, 30 + 0x0100_0000, 1, 300),
        ];
        assert_eq!(roundtrip(&messages, 128), messages);
    }

    #[test]
    fn test_extended_timestamp_wire_format() {
        let msg = message(CSID_VIDEO, MSG_VIDEO, 0x0100_0000, 1, 200);
        let mut buf = BytesMut::new();
        ChunkEncoder::new().encode(&msg, &mut buf);

        assert_eq!(&buf[1..4], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&buf[12..16], &[0x01, 0x00, 0x00, 0x00]);
        // continuation chunk repeats the extended timestamp
        let cont = 12 + 4 + 128;
        assert_eq!(buf[cont], 0xC6);
        assert_eq!(&buf[cont + 1..cont + 5], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_omitted_extended_timestamp_on_continuation() {
        let payload: Vec<u8> = (0..200).map(|i| (i + 7) as u8).collect();
        let mut buf = BytesMut::new();
        buf.put_u8(0x06);
        buf.put_slice(&[0xFF, 0xFF, 0xFF]);
        write_u24(200, &mut buf);
        buf.put_u8(MSG_VIDEO);
        buf.put_u32_le(1);
        buf.put_u32(0x0100_0000);
        buf.put_slice(&payload[..128]);
        // continuation without the 4-byte field
        buf.put_u8(0xC6);
        buf.put_slice(&payload[128..]);

        let mut decoder = ChunkDecoder::new();
        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.header.timestamp, 0x0100_0000);
        assert_eq!(&msg.payload[..], &payload[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let messages = vec![
            message(CSID_COMMAND, MSG_COMMAND_AMF0, 0, 0, 150),
            message(CSID_VIDEO, MSG_VIDEO, 0x0100_0000, 1, 300),
            message(CSID_VIDEO, MSG_VIDEO, 0x0100_0021, 1, 300),
        ];
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        for msg in &messages {
            encoder.encode(msg, &mut wire);
        }

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for byte in wire.iter() {
            buf.put_u8(*byte);
            while let Some(msg) = decoder.decode(&mut buf).unwrap() {
                out.push(msg);
            }
        }
        assert_eq!(out, messages);
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        let audio: Vec<u8> = vec![0xAF; 200];
        let video: Vec<u8> = vec![0x17; 150];

        let mut buf = BytesMut::new();
        buf.put_u8(0x04);
        write_u24(26, &mut buf);
        write_u24(200, &mut buf);
        buf.put_u8(MSG_AUDIO);
        buf.put_u32_le(1);
        buf.put_slice(&audio[..128]);

        buf.put_u8(0x06);
        write_u24(40, &mut buf);
        write_u24(150, &mut buf);
        buf.put_u8(MSG_VIDEO);
        buf.put_u32_le(1);
        buf.put_slice(&video[..128]);

        buf.put_u8(0xC4);
        buf.put_slice(&audio[128..]);
        buf.put_u8(0xC6);
        buf.put_slice(&video[128..]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut buf);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].csid, 4);
        assert_eq!(out[0].header.timestamp, 26);
        assert_eq!(&out[0].payload[..], &audio[..]);
        assert_eq!(out[1].csid, 6);
        assert_eq!(out[1].header.timestamp, 40);
        assert_eq!(&out[1].payload[..], &video[..]);
    }

    #[test]
    fn test_fmt3_new_message_repeats_delta() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x04);
        write_u24(26, &mut buf);
        write_u24(2, &mut buf);
        buf.put_u8(MSG_AUDIO);
        buf.put_u32_le(1);
        buf.put_slice(&[0xAF, 0x01]);
        buf.put_u8(0xC4);
        buf.put_slice(&[0xAF, 0x01]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut buf);
        assert_eq!(out[0].header.timestamp, 26);
        assert_eq!(out[1].header.timestamp, 52);
        assert_eq!(out[1].header.stream_id, 1);
    }

    #[test]
    fn test_fresh_stream_format_rules() {
        // fmt 2 on a fresh csid
        let mut buf = BytesMut::from(&[0x85u8, 0, 0, 0][..]);
        let err = ChunkDecoder::new().decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnexpectedChunkFormat { csid: 5, fmt: 2 })
        ));

        // fmt 1 is tolerated (librtmp pings)
        let mut buf = BytesMut::new();
        buf.put_u8(0x42);
        write_u24(0, &mut buf);
        write_u24(6, &mut buf);
        buf.put_u8(MSG_USER_CONTROL);
        buf.put_slice(&[0, 6, 0, 0, 0x0D, 0x0F]);
        let msg = ChunkDecoder::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.header.message_type, MSG_USER_CONTROL);
        assert_eq!(msg.header.stream_id, 0);
    }

    #[test]
    fn test_fmt0_inside_partial_message_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x06);
        write_u24(0, &mut buf);
        write_u24(200, &mut buf);
        buf.put_u8(MSG_VIDEO);
        buf.put_u32_le(1);
        buf.put_slice(&[0u8; 128]);
        buf.put_u8(0x06);
        buf.put_slice(&[0u8; 11]);

        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_abort_discards_partial() {
        let msg = message(CSID_VIDEO, MSG_VIDEO, 0, 1, 200);
        let mut wire = BytesMut::new();
        ChunkEncoder::new().encode(&msg, &mut wire);

        let mut decoder = ChunkDecoder::new();
        let mut first = wire.split_to(12 + 128);
        assert_eq!(decoder.decode(&mut first).unwrap(), None);
        assert_eq!(decoder.partial_len(CSID_VIDEO), Some(128));

        decoder.abort(CSID_VIDEO);
        assert_eq!(decoder.partial_len(CSID_VIDEO), None);

        // the csid keeps its header state; a fresh fmt 0 message decodes
        let next = message(CSID_VIDEO, MSG_VIDEO, 40, 1, 10);
        let mut buf = BytesMut::new();
        ChunkEncoder::new().encode(&next, &mut buf);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(next));
    }

    #[test]
    fn test_message_too_large() {
        let mut decoder = ChunkDecoder::new();
        decoder.set_max_message_size(100);

        let mut buf = BytesMut::new();
        ChunkEncoder::new().encode(&message(CSID_VIDEO, MSG_VIDEO, 0, 1, 101), &mut buf);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MessageTooLarge { size: 101, max: 100 })
        ));
    }

    #[test]
    fn test_set_chunk_size_bounds() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.set_chunk_size(127).is_err());
        assert!(decoder.set_chunk_size(MAX_CHUNK_SIZE + 1).is_err());
        decoder.set_chunk_size(0x8000_1000).unwrap();
        assert_eq!(decoder.chunk_size(), 0x1000);
    }

    #[test]
    fn test_incomplete_header_consumes_nothing() {
        let mut buf = BytesMut::from(&[0x06u8, 0x00, 0x00][..]);
        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
    }
}
