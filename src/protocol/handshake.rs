//! RTMP handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes) -------------->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes) ---------------|
//!   |<------ S2 (1536 bytes) ---------------|
//!   |------- C2 (1536 bytes) -------------->|
//! ```
//!
//! Two flavours share the same framing. The simple handshake fills C1/S1
//! with time + zero + random and echoes the peer's block back. The complex
//! handshake hides an HMAC-SHA256 digest inside C1/S1 at an offset derived
//! from the packet itself; Flash players expect it before they will play
//! H.264/AAC. A C1 whose digest cannot be validated under either layout
//! is answered with the simple handshake instead of failing.
//!
//! `Handshake` is sans-IO; `server_handshake` and `client_handshake` drive
//! it over a socket.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{HandshakeError, Result};
use crate::protocol::buffer::FastBuffer;
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

type HmacSha256 = Hmac<Sha256>;

const DIGEST_LENGTH: usize = 32;

/// Bytes of the 764-byte digest block available for the offset
const DIGEST_OFFSET_MODULO: usize = 728;

/// Size of each key/digest block in C1/S1
const BLOCK_SIZE: usize = 764;

/// "Genuine Adobe Flash Media Server 001" + 32 key bytes
const FMS_KEY: [u8; 68] = [
    0x47, 0x65, 0x6e, 0x75, 0x69, 0x6e, 0x65, 0x20, 0x41, 0x64, 0x6f, 0x62, 0x65, 0x20, 0x46,
    0x6c, 0x61, 0x73, 0x68, 0x20, 0x4d, 0x65, 0x64, 0x69, 0x61, 0x20, 0x53, 0x65, 0x72, 0x76,
    0x65, 0x72, 0x20, 0x30, 0x30, 0x31, 0xf0, 0xee, 0xc2, 0x4a, 0x80, 0x68, 0xbe, 0xe8, 0x2e,
    0x00, 0xd0, 0xd1, 0x02, 0x9e, 0x7e, 0x57, 0x6e, 0xec, 0x5d, 0x2d, 0x29, 0x80, 0x6f, 0xab,
    0x93, 0xb8, 0xe6, 0x36, 0xcf, 0xeb, 0x31, 0xae,
];

/// "Genuine Adobe Flash Player 001" + 32 key bytes
const FP_KEY: [u8; 62] = [
    0x47, 0x65, 0x6e, 0x75, 0x69, 0x6e, 0x65, 0x20, 0x41, 0x64, 0x6f, 0x62, 0x65, 0x20, 0x46,
    0x6c, 0x61, 0x73, 0x68, 0x20, 0x50, 0x6c, 0x61, 0x79, 0x65, 0x72, 0x20, 0x30, 0x30, 0x31,
    0xf0, 0xee, 0xc2, 0x4a, 0x80, 0x68, 0xbe, 0xe8, 0x2e, 0x00, 0xd0, 0xd1, 0x02, 0x9e, 0x7e,
    0x57, 0x6e, 0xec, 0x5d, 0x2d, 0x29, 0x80, 0x6f, 0xab, 0x93, 0xb8, 0xe6, 0x36, 0xcf, 0xeb,
    0x31, 0xae,
];

/// Text-only prefixes used to sign C1 and S1
const FMS_KEY_TEXT: usize = 36;
const FP_KEY_TEXT: usize = 30;

/// Version field written into a complex S1
const SERVER_VERSION: [u8; 4] = [0x04, 0x05, 0x00, 0x01];

/// Version field written into a complex C1
const CLIENT_VERSION: [u8; 4] = [0x80, 0x00, 0x07, 0x02];

/// Handshake role (client or server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

/// Which handshake flavour was (or will be) used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    Simple,
    Complex,
}

/// Where the digest block sits inside C1/S1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestSchema {
    /// time, version, key block, digest block
    KeyFirst,
    /// time, version, digest block, key block
    DigestFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Initial,
    /// Waiting for C0C1 (server) or S0S1S2 (client)
    WaitingForPeerPacket,
    /// Server only: waiting for C2
    WaitingForPeerResponse,
    Done,
}

/// Handshake state machine
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
    mode: HandshakeMode,
    /// Schema and digest of our complex C1, kept to recognise a complex S1
    our_digest: Option<DigestSchema>,
}

impl Handshake {
    /// Server handshakes negotiate the mode from C1; clients offer complex
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            state: HandshakeState::Initial,
            mode: HandshakeMode::Complex,
            our_digest: None,
        }
    }

    /// Client that sends a plain C1 and never attempts the digest exchange
    pub fn simple_client() -> Self {
        Self {
            mode: HandshakeMode::Simple,
            ..Self::new(HandshakeRole::Client)
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Flavour in effect; final once `is_done()`
    pub fn mode(&self) -> HandshakeMode {
        self.mode
    }

    /// Bytes `process` needs before it can make progress
    pub fn bytes_needed(&self) -> usize {
        match (self.state, self.role) {
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Server) => 1 + HANDSHAKE_SIZE,
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Client) => {
                1 + HANDSHAKE_SIZE * 2
            }
            (HandshakeState::WaitingForPeerResponse, _) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// C0C1 for a client; a server has nothing to send first
    pub fn generate_initial(&mut self) -> Result<Option<Bytes>> {
        if self.state != HandshakeState::Initial {
            return Err(HandshakeError::InvalidState.into());
        }
        self.state = HandshakeState::WaitingForPeerPacket;

        match self.role {
            HandshakeRole::Client => {
                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);

                let c1 = match self.mode {
                    HandshakeMode::Simple => generate_packet([0; 4]),
                    HandshakeMode::Complex => {
                        let mut c1 = generate_packet(CLIENT_VERSION);
                        embed_digest(&mut c1, DigestSchema::DigestFirst, &FP_KEY[..FP_KEY_TEXT])?;
                        self.our_digest = Some(DigestSchema::DigestFirst);
                        c1
                    }
                };
                buf.put_slice(&c1);
                Ok(Some(buf.freeze()))
            }
            HandshakeRole::Server => Ok(None),
        }
    }

    /// Feed peer bytes; returns what to write back, if anything.
    ///
    /// Returns `Ok(None)` without consuming when fewer than
    /// `bytes_needed()` bytes are available.
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if data.remaining() < self.bytes_needed() {
            return Ok(None);
        }
        match (self.state, self.role) {
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Server) => {
                self.process_c0c1(data).map(Some)
            }
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Client) => {
                self.process_s0s1s2(data).map(Some)
            }
            (HandshakeState::WaitingForPeerResponse, HandshakeRole::Server) => {
                // C2 is not verified; several encoders send garbage here
                data.advance(HANDSHAKE_SIZE);
                self.state = HandshakeState::Done;
                Ok(None)
            }
            _ => Err(HandshakeError::InvalidState.into()),
        }
    }

    fn process_c0c1(&mut self, data: &mut Bytes) -> Result<Bytes> {
        check_version(data.get_u8())?;

        let mut c1 = [0u8; HANDSHAKE_SIZE];
        data.copy_to_slice(&mut c1);

        let mut response = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
        response.put_u8(RTMP_VERSION);

        match find_digest(&c1, &FP_KEY[..FP_KEY_TEXT])? {
            Some((schema, c1_digest)) => {
                let mut s1 = generate_packet(SERVER_VERSION);
                embed_digest(&mut s1, schema, &FMS_KEY[..FMS_KEY_TEXT])?;
                let s2 = generate_signed_response(&FMS_KEY, &c1_digest)?;

                tracing::debug!(schema = ?schema, "Complex handshake");
                self.mode = HandshakeMode::Complex;
                response.put_slice(&s1);
                response.put_slice(&s2);
            }
            None => {
                if c1[4..8] != [0, 0, 0, 0] {
                    tracing::warn!("C1 digest did not validate, falling back to simple handshake");
                } else {
                    tracing::debug!("Simple handshake");
                }
                self.mode = HandshakeMode::Simple;
                response.put_slice(&generate_packet([0; 4]));
                response.put_slice(&generate_echo(&c1));
            }
        }

        self.state = HandshakeState::WaitingForPeerResponse;
        Ok(response.freeze())
    }

    fn process_s0s1s2(&mut self, data: &mut Bytes) -> Result<Bytes> {
        check_version(data.get_u8())?;

        let mut s1 = [0u8; HANDSHAKE_SIZE];
        data.copy_to_slice(&mut s1);
        // S2 is not verified
        data.advance(HANDSHAKE_SIZE);

        let s1_digest = match self.our_digest {
            Some(schema) => {
                let pos = digest_position(&s1, schema);
                let expected = compute_digest(&s1, pos, &FMS_KEY[..FMS_KEY_TEXT])?;
                (s1[pos..pos + DIGEST_LENGTH] == expected).then_some(expected)
            }
            None => None,
        };

        self.state = HandshakeState::Done;
        match s1_digest {
            Some(digest) => {
                self.mode = HandshakeMode::Complex;
                Ok(Bytes::copy_from_slice(&generate_signed_response(&FP_KEY, &digest)?))
            }
            None => {
                if self.our_digest.is_some() {
                    tracing::warn!("S1 digest did not validate, falling back to simple handshake");
                }
                self.mode = HandshakeMode::Simple;
                Ok(Bytes::copy_from_slice(&generate_echo(&s1)))
            }
        }
    }
}

/// Run the server side over `stream`.
///
/// Bytes the client sent after C2 stay in `buf` for the chunk decoder.
pub async fn server_handshake<S>(stream: &mut S, buf: &mut FastBuffer) -> Result<HandshakeMode>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = Handshake::new(HandshakeRole::Server);
    handshake.generate_initial()?;
    drive(&mut handshake, stream, buf).await?;
    Ok(handshake.mode())
}

/// Run the client side over `stream`
pub async fn client_handshake<S>(
    stream: &mut S,
    buf: &mut FastBuffer,
    mode: HandshakeMode,
) -> Result<HandshakeMode>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = match mode {
        HandshakeMode::Simple => Handshake::simple_client(),
        HandshakeMode::Complex => Handshake::new(HandshakeRole::Client),
    };
    if let Some(c0c1) = handshake.generate_initial()? {
        stream.write_all(&c0c1).await?;
        stream.flush().await?;
    }
    drive(&mut handshake, stream, buf).await?;
    Ok(handshake.mode())
}

async fn drive<S>(handshake: &mut Handshake, stream: &mut S, buf: &mut FastBuffer) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while !handshake.is_done() {
        let needed = handshake.bytes_needed();
        buf.grow(stream, needed).await?;

        let mut data = buf.read_bytes(needed)?;
        if let Some(response) = handshake.process(&mut data)? {
            stream.write_all(&response).await?;
            stream.flush().await?;
        }
    }
    Ok(())
}

fn check_version(version: u8) -> Result<()> {
    // 6 and 8 are RTMPE; anything below 3 predates RTMP
    if version < RTMP_VERSION || version == 6 || version == 8 {
        return Err(HandshakeError::InvalidVersion(version).into());
    }
    Ok(())
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; DIGEST_LENGTH]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| HandshakeError::DigestMismatch)?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; DIGEST_LENGTH];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Offset of the 32 digest bytes inside a C1/S1 packet
fn digest_position(packet: &[u8; HANDSHAKE_SIZE], schema: DigestSchema) -> usize {
    let block = match schema {
        DigestSchema::KeyFirst => 8 + BLOCK_SIZE,
        DigestSchema::DigestFirst => 8,
    };
    let offset = packet[block..block + 4]
        .iter()
        .map(|b| *b as usize)
        .sum::<usize>()
        % DIGEST_OFFSET_MODULO;
    block + 4 + offset
}

/// HMAC of the packet with the digest bytes themselves left out
fn compute_digest(
    packet: &[u8; HANDSHAKE_SIZE],
    pos: usize,
    key: &[u8],
) -> Result<[u8; DIGEST_LENGTH]> {
    hmac_sha256(key, &[&packet[..pos], &packet[pos + DIGEST_LENGTH..]])
}

fn embed_digest(packet: &mut [u8; HANDSHAKE_SIZE], schema: DigestSchema, key: &[u8]) -> Result<()> {
    let pos = digest_position(packet, schema);
    let digest = compute_digest(packet, pos, key)?;
    packet[pos..pos + DIGEST_LENGTH].copy_from_slice(&digest);
    Ok(())
}

/// Try both layouts; the first whose embedded digest checks out wins
fn find_digest(
    packet: &[u8; HANDSHAKE_SIZE],
    key: &[u8],
) -> Result<Option<(DigestSchema, [u8; DIGEST_LENGTH])>> {
    for schema in [DigestSchema::KeyFirst, DigestSchema::DigestFirst] {
        let pos = digest_position(packet, schema);
        let expected = compute_digest(packet, pos, key)?;
        if packet[pos..pos + DIGEST_LENGTH] == expected {
            return Ok(Some((schema, expected)));
        }
    }
    Ok(None)
}

/// S2/C2 for the complex handshake: random bytes signed with a key
/// derived from the peer's C1/S1 digest
fn generate_signed_response(
    key: &[u8],
    peer_digest: &[u8; DIGEST_LENGTH],
) -> Result<[u8; HANDSHAKE_SIZE]> {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    rand::thread_rng().fill(&mut packet[..]);

    let signing_key = hmac_sha256(key, &[peer_digest])?;
    let split = HANDSHAKE_SIZE - DIGEST_LENGTH;
    let signature = hmac_sha256(&signing_key, &[&packet[..split]])?;
    packet[split..].copy_from_slice(&signature);
    Ok(packet)
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1/S1: timestamp, version field, random fill
fn generate_packet(version: [u8; 4]) -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    packet[0..4].copy_from_slice(&now_millis().to_be_bytes());
    packet[4..8].copy_from_slice(&version);
    rand::thread_rng().fill(&mut packet[8..]);
    packet
}

/// C2/S2 for the simple handshake: the peer's block with our read time
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}
