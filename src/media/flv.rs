//! FLV tag-byte inspection
//!
//! RTMP audio/video payloads are FLV tag bodies. The live source only needs
//! to look at their first bytes to tell sequence headers and keyframes
//! apart from ordinary frames.
//!
//! Video tag body:
//! ```text
//! +-----------+----------+----------------+
//! | FrameType | CodecID  | AVCPacketType  | ...
//! | (4 bits)  | (4 bits) | (8 bits)       |
//! +-----------+----------+----------------+
//! ```
//!
//! Enhanced RTMP sets the top bit of the first byte; the low nibble then
//! carries the packet type and a FourCC follows instead of a codec id.
//!
//! Audio tag body:
//! ```text
//! +-------------+-----------+----------+----------+----------------+
//! | SoundFormat | SoundRate | SoundSize| SoundType| AACPacketType  | ...
//! | (4 bits)    | (2 bits)  | (1 bit)  | (1 bit)  | (8 bits)       |
//! +-------------+-----------+----------+----------+----------------+
//! ```

/// Video frame type (bits 4-6 of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
    DisposableInterFrame = 3,
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x07 {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }
}

/// Legacy video codec id (low nibble of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    /// H.264
    Avc = 7,
    /// H.265 under the unofficial id 12
    Hevc = 12,
    /// AV1 under the unofficial id 13
    Av1 = 13,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            13 => Some(VideoCodec::Av1),
            _ => None,
        }
    }

    /// Codecs whose second byte is an AVC-style packet type
    pub fn has_packet_type(&self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc | VideoCodec::Av1)
    }
}

/// Audio format (high nibble of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    G711ALaw = 7,
    G711MuLaw = 8,
    /// Enhanced RTMP: low nibble is a packet type, FourCC follows
    ExHeader = 9,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b >> 4 {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            9 => Some(AudioFormat::ExHeader),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// Enhanced RTMP packet type for SequenceStart
const EX_PACKET_SEQUENCE_START: u8 = 0;

fn is_ex_video_header(data: &[u8]) -> bool {
    data.first().map(|b| b & 0x80 != 0).unwrap_or(false)
}

/// Decoder configuration record (AVC/HEVC sequence header or enhanced SequenceStart)
pub fn is_video_sequence_header(data: &[u8]) -> bool {
    let Some(&first) = data.first() else {
        return false;
    };
    if is_ex_video_header(data) {
        return first & 0x0F == EX_PACKET_SEQUENCE_START;
    }
    match VideoCodec::from_byte(first) {
        Some(codec) if codec.has_packet_type() => {
            VideoFrameType::from_byte(first) == Some(VideoFrameType::Keyframe)
                && data.get(1) == Some(&0)
        }
        _ => false,
    }
}

/// Frame type 1; sequence headers also satisfy this and must be checked first
pub fn is_video_keyframe(data: &[u8]) -> bool {
    data.first()
        .map(|b| VideoFrameType::from_byte(*b) == Some(VideoFrameType::Keyframe))
        .unwrap_or(false)
}

/// AAC AudioSpecificConfig or enhanced audio SequenceStart
pub fn is_audio_sequence_header(data: &[u8]) -> bool {
    let Some(&first) = data.first() else {
        return false;
    };
    match AudioFormat::from_byte(first) {
        Some(AudioFormat::Aac) => data.get(1) == Some(&0),
        Some(AudioFormat::ExHeader) => first & 0x0F == EX_PACKET_SEQUENCE_START,
        _ => false,
    }
}

/// Codec of a legacy (non-enhanced) video tag
pub fn video_codec(data: &[u8]) -> Option<VideoCodec> {
    if is_ex_video_header(data) {
        return None;
    }
    data.first().and_then(|b| VideoCodec::from_byte(*b))
}

pub fn audio_format(data: &[u8]) -> Option<AudioFormat> {
    data.first().and_then(|b| AudioFormat::from_byte(*b))
}
