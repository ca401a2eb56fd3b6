//! Shared media message
//!
//! The payload is a `Bytes` handle, so cloning a `SharedMessage` copies
//! only the header and bumps a reference count. Every consumer of a
//! source gets its own header (and so its own jitter-corrected timestamp)
//! over the same payload allocation.

use bytes::Bytes;

use crate::media::flv;
use crate::protocol::chunk::{MessageHeader, RtmpMessage};
use crate::protocol::constants::{CSID_AUDIO, CSID_DATA, CSID_VIDEO};

#[derive(Debug, Clone)]
pub struct SharedMessage {
    pub header: MessageHeader,
    payload: Bytes,
}

impl SharedMessage {
    pub fn new(message_type: u8, timestamp: u32, payload: Bytes) -> Self {
        let mut header = MessageHeader::new(message_type, timestamp, 0);
        header.payload_length = payload.len() as u32;
        Self { header, payload }
    }

    pub fn from_message(msg: RtmpMessage) -> Self {
        Self {
            header: msg.header,
            payload: msg.payload,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn is_audio(&self) -> bool {
        self.header.is_audio()
    }

    pub fn is_video(&self) -> bool {
        self.header.is_video()
    }

    pub fn is_av(&self) -> bool {
        self.header.is_av()
    }

    /// Codec configuration for either track
    pub fn is_sequence_header(&self) -> bool {
        (self.is_video() && flv::is_video_sequence_header(&self.payload))
            || (self.is_audio() && flv::is_audio_sequence_header(&self.payload))
    }

    pub fn is_keyframe(&self) -> bool {
        self.is_video() && flv::is_video_keyframe(&self.payload)
    }

    /// Whether both handles point at the same payload allocation
    pub fn shares_payload(&self, other: &SharedMessage) -> bool {
        self.payload.as_ptr() == other.payload.as_ptr() && self.payload.len() == other.payload.len()
    }

    /// Outgoing message on the player's message stream
    pub fn to_rtmp(&self, stream_id: u32) -> RtmpMessage {
        let csid = if self.is_audio() {
            CSID_AUDIO
        } else if self.is_video() {
            CSID_VIDEO
        } else {
            CSID_DATA
        };
        let mut header = self.header;
        header.stream_id = stream_id;
        RtmpMessage::new(csid, header, self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO};

    #[test]
    fn test_clone_shares_payload() {
        let msg = SharedMessage::new(MSG_VIDEO, 40, Bytes::from(vec![0x27, 0x01, 0x00]));
        let mut copy = msg.clone();
        copy.header.timestamp = 0;

        assert!(copy.shares_payload(&msg));
        assert_eq!(msg.timestamp(), 40);
        assert_eq!(msg.header.payload_length, 3);
    }

    #[test]
    fn test_classification() {
        let sh = SharedMessage::new(MSG_VIDEO, 0, Bytes::from_static(&[0x17, 0x00]));
        assert!(sh.is_sequence_header());
        assert!(sh.is_keyframe());

        let aac = SharedMessage::new(MSG_AUDIO, 0, Bytes::from_static(&[0xAF, 0x00, 0x12]));
        assert!(aac.is_sequence_header());
        assert!(!aac.is_keyframe());

        let meta = SharedMessage::new(MSG_DATA_AMF0, 0, Bytes::from_static(&[0x02]));
        assert!(!meta.is_av());
        assert!(!meta.is_sequence_header());
    }

    #[test]
    fn test_to_rtmp_rewrites_stream_id() {
        let msg = SharedMessage::new(MSG_AUDIO, 80, Bytes::from_static(&[0xAF, 0x01]));
        let out = msg.to_rtmp(3);
        assert_eq!(out.csid, CSID_AUDIO);
        assert_eq!(out.header.stream_id, 3);
        assert_eq!(out.header.timestamp, 80);
        assert_eq!(out.payload, *msg.payload());
    }
}
