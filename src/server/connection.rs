//! Per-connection RTMP session
//!
//! Manages the lifecycle of a single connection:
//! 1. Handshake (bounded by `handshake_timeout`)
//! 2. Control setup and `connect`
//! 3. Stream commands (`createStream`, `publish`, `play`, ...)
//! 4. Publish loop: demuxed audio/video/metadata go into the live source
//! 5. Play loop: the consumer's queue is drained into the chunk encoder
//! 6. On exit the session is detached from whatever source it used

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::timeout;

use crate::error::{Error, ProtocolError, Result};
use crate::live::consumer::Consumer;
use crate::live::message::SharedMessage;
use crate::live::registry::{SourceRegistry, StreamKey};
use crate::live::source::LiveSource;
use crate::protocol::buffer::FastBuffer;
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RtmpMessage};
use crate::protocol::constants::*;
use crate::protocol::handshake::server_handshake;
use crate::protocol::message::{ConnectParams, Packet, UserControlEvent};
use crate::server::config::ServerConfig;
use crate::server::handler::{AuthResult, RtmpHandler, SessionContext};

/// What the session is doing with its message stream
enum Role {
    Idle,
    Publishing {
        key: StreamKey,
        source: Arc<LiveSource>,
    },
    Playing {
        key: StreamKey,
        consumer: Consumer,
        stream_id: u32,
    },
}

enum PlayEvent {
    Read(Result<usize>),
    Ready,
}

pub struct Connection<H: RtmpHandler, S> {
    ctx: SessionContext,
    stream: BufWriter<S>,
    read_buf: FastBuffer,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    write_buf: BytesMut,
    config: ServerConfig,
    handler: Arc<H>,
    registry: Arc<SourceRegistry>,
    next_stream_id: u32,
    /// Window the peer asked us to acknowledge (0 = never)
    peer_window_ack: u32,
    /// `total_read` at the last acknowledgement
    acked_bytes: u64,
    role: Role,
}

impl<H, S> Connection<H, S>
where
    H: RtmpHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        session_id: u64,
        stream: S,
        peer_addr: SocketAddr,
        config: ServerConfig,
        handler: Arc<H>,
        registry: Arc<SourceRegistry>,
    ) -> Self {
        Self {
            ctx: SessionContext::new(session_id, peer_addr),
            stream: BufWriter::with_capacity(config.write_buffer_size, stream),
            read_buf: FastBuffer::with_capacity(config.read_buffer_size),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
            config,
            handler,
            registry,
            next_stream_id: 1,
            peer_window_ack: 0,
            acked_bytes: 0,
            role: Role::Idle,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.ctx.session_id
    }

    /// Run the session to completion. A peer disconnect is a normal end.
    pub async fn run(&mut self) -> Result<()> {
        if !self.handler.on_connection(&self.ctx).await {
            return Err(Error::Rejected("connection refused by handler".into()));
        }

        let mode = timeout(
            self.config.handshake_timeout,
            server_handshake(&mut self.stream, &mut self.read_buf),
        )
        .await??;
        tracing::debug!(session_id = self.ctx.session_id, mode = ?mode, "Handshake complete");

        self.send(Packet::SetChunkSize(self.config.chunk_size), 0).await?;
        self.encoder.set_chunk_size(self.config.chunk_size);

        let result = self.message_loop().await;

        self.release().await;
        self.handler.on_disconnect(&self.ctx).await;

        match result {
            Err(e) if e.is_disconnect() => Ok(()),
            other => other,
        }
    }

    async fn message_loop(&mut self) -> Result<()> {
        loop {
            if matches!(self.role, Role::Playing { .. }) {
                self.play_cycle().await?;
            } else {
                let msg = self.recv_message().await?;
                self.handle_message(msg).await?;
            }
        }
    }

    /// Next complete message, reading as needed
    async fn recv_message(&mut self) -> Result<RtmpMessage> {
        loop {
            if let Some(msg) = self.decoder.decode(self.read_buf.bytes_mut())? {
                return Ok(msg);
            }
            timeout(self.config.recv_timeout, self.read_buf.fill(&mut self.stream)).await??;
            self.maybe_acknowledge().await?;
        }
    }

    /// One step of the play loop: either the player said something or the
    /// consumer has enough queued to write a batch
    async fn play_cycle(&mut self) -> Result<()> {
        if let Some(msg) = self.decoder.decode(self.read_buf.bytes_mut())? {
            return self.handle_message(msg).await;
        }

        let Role::Playing { consumer, .. } = &self.role else {
            return Ok(());
        };

        let event = tokio::select! {
            read = self.read_buf.fill(&mut self.stream) => PlayEvent::Read(read),
            _ = consumer.wait(self.config.mw_min_msgs, self.config.mw_wait) => PlayEvent::Ready,
        };

        match event {
            PlayEvent::Read(read) => {
                read?;
                self.maybe_acknowledge().await
            }
            PlayEvent::Ready => self.send_queued().await,
        }
    }

    async fn send_queued(&mut self) -> Result<()> {
        let Role::Playing {
            consumer,
            stream_id,
            ..
        } = &self.role
        else {
            return Ok(());
        };

        let stream_id = *stream_id;
        let messages = consumer.dump_packets(self.config.mw_max_batch);
        if messages.is_empty() {
            return Ok(());
        }

        self.write_buf.clear();
        for msg in &messages {
            self.encoder.encode(&msg.to_rtmp(stream_id), &mut self.write_buf);
        }
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        tracing::trace!(
            session_id = self.ctx.session_id,
            messages = messages.len(),
            bytes = self.write_buf.len(),
            "Sent batch"
        );
        Ok(())
    }

    async fn handle_message(&mut self, msg: RtmpMessage) -> Result<()> {
        if msg.header.is_av() {
            self.handle_media(msg);
            return Ok(());
        }

        if msg.payload.is_empty() {
            tracing::trace!(
                session_id = self.ctx.session_id,
                message_type = msg.header.message_type,
                "Ignoring empty message"
            );
            return Ok(());
        }

        let stream_id = msg.header.stream_id;
        let timestamp = msg.header.timestamp;

        match Packet::decode(&msg)? {
            Packet::SetChunkSize(size) => {
                self.decoder.set_chunk_size(size)?;
                tracing::debug!(session_id = self.ctx.session_id, size = size, "Peer set chunk size");
            }
            Packet::Abort { csid } => self.decoder.abort(csid),
            Packet::WindowAckSize(size) => {
                self.peer_window_ack = size;
                self.maybe_acknowledge().await?;
            }
            Packet::UserControl(UserControlEvent::PingRequest(time)) => {
                self.send(Packet::UserControl(UserControlEvent::PingResponse(time)), 0)
                    .await?;
            }
            Packet::Connect {
                transaction_id,
                params,
            } => self.handle_connect(transaction_id, params).await?,
            Packet::CreateStream { transaction_id } => {
                let id = self.next_stream_id;
                self.next_stream_id += 1;
                self.send(Packet::create_stream_result(transaction_id, id), 0)
                    .await?;
            }
            Packet::ReleaseStream { transaction_id, .. } => {
                self.send(Packet::empty_result(transaction_id), 0).await?;
            }
            Packet::FcPublish {
                transaction_id,
                stream_name,
            } => {
                self.send(Packet::empty_result(transaction_id), 0).await?;
                self.send(
                    Packet::on_fc(CMD_ON_FC_PUBLISH, NS_PUBLISH_START, &stream_name),
                    0,
                )
                .await?;
            }
            Packet::FcUnpublish {
                transaction_id,
                stream_name,
            } => {
                self.send(
                    Packet::on_fc(CMD_ON_FC_UNPUBLISH, NS_UNPUBLISH_SUCCESS, &stream_name),
                    0,
                )
                .await?;
                self.send(Packet::empty_result(transaction_id), 0).await?;
            }
            Packet::Publish { stream_name, .. } => {
                self.handle_publish(stream_id, &stream_name).await?;
            }
            Packet::Play {
                stream_name, reset, ..
            } => self.handle_play(stream_id, &stream_name, reset).await?,
            Packet::Pause { paused, .. } => self.handle_pause(paused).await?,
            Packet::DeleteStream { .. } | Packet::CloseStream { .. } => self.release().await,
            Packet::Metadata(value) => {
                if let Role::Publishing { source, .. } = &self.role {
                    // Republished as plain onMetaData, without @setDataFrame
                    let (message_type, payload) = Packet::Metadata(value).encode();
                    source.on_metadata(SharedMessage::new(message_type, timestamp, payload));
                }
            }
            other => {
                tracing::trace!(session_id = self.ctx.session_id, packet = ?other, "Ignored message");
            }
        }

        Ok(())
    }

    fn handle_media(&mut self, msg: RtmpMessage) {
        let Role::Publishing { source, .. } = &self.role else {
            tracing::trace!(session_id = self.ctx.session_id, "Media outside publish, dropped");
            return;
        };
        if msg.payload.is_empty() {
            return;
        }

        let msg = SharedMessage::from_message(msg);
        if msg.is_video() {
            source.on_video(msg);
        } else {
            source.on_audio(msg);
        }
    }

    async fn handle_connect(&mut self, transaction_id: f64, params: ConnectParams) -> Result<()> {
        match self.handler.on_connect(&self.ctx, &params).await {
            AuthResult::Accept => {
                self.send(Packet::WindowAckSize(self.config.window_ack_size), 0)
                    .await?;
                self.send(
                    Packet::SetPeerBandwidth {
                        size: self.config.peer_bandwidth,
                        limit_type: BANDWIDTH_LIMIT_DYNAMIC,
                    },
                    0,
                )
                .await?;
                self.send(Packet::UserControl(UserControlEvent::StreamBegin(0)), 0)
                    .await?;
                self.send(
                    Packet::connect_result(transaction_id, params.object_encoding),
                    0,
                )
                .await?;

                tracing::info!(
                    session_id = self.ctx.session_id,
                    app = %params.app,
                    vhost = %params.vhost(),
                    "Connected"
                );
                self.ctx.connect_params = Some(Arc::new(params));
                Ok(())
            }
            AuthResult::Reject(reason) => {
                self.send(Packet::connect_rejected(transaction_id, &reason), 0)
                    .await?;
                Err(Error::Rejected(reason))
            }
        }
    }

    fn require_connected(&self, command: &str) -> Result<()> {
        if self.ctx.connect_params.is_none() {
            return Err(
                ProtocolError::InvalidCommand(format!("{} before connect", command)).into(),
            );
        }
        Ok(())
    }

    async fn handle_publish(&mut self, stream_id: u32, stream_name: &str) -> Result<()> {
        self.require_connected(CMD_PUBLISH)?;
        self.release().await;

        let key = self.ctx.stream_key(stream_name);
        if let AuthResult::Reject(reason) = self.handler.on_publish(&self.ctx, &key).await {
            self.send(Packet::on_status("error", NS_PUBLISH_BAD_NAME, &reason), stream_id)
                .await?;
            return Err(Error::Rejected(reason));
        }

        let source = self.registry.fetch_or_create(&key).await;
        if let Err(e) = source.on_publish(self.ctx.session_id) {
            let description = format!("{} is already being published", key);
            self.send(Packet::on_status("error", NS_PUBLISH_BAD_NAME, &description), stream_id)
                .await?;
            return Err(e);
        }

        self.role = Role::Publishing {
            key: key.clone(),
            source,
        };
        self.send(
            Packet::on_status("status", NS_PUBLISH_START, &format!("{} is now published", key)),
            stream_id,
        )
        .await?;

        tracing::info!(
            session_id = self.ctx.session_id,
            stream = %key,
            stream_id = stream_id,
            "Publishing started"
        );
        Ok(())
    }

    async fn handle_play(&mut self, stream_id: u32, stream_name: &str, reset: bool) -> Result<()> {
        self.require_connected(CMD_PLAY)?;
        self.release().await;

        let key = self.ctx.stream_key(stream_name);
        if let AuthResult::Reject(reason) = self.handler.on_play(&self.ctx, &key).await {
            self.send(
                Packet::on_status("error", NS_PLAY_STREAM_NOT_FOUND, &reason),
                stream_id,
            )
            .await?;
            return Ok(());
        }

        let source = self.registry.fetch_or_create(&key).await;

        self.send(
            Packet::UserControl(UserControlEvent::StreamBegin(stream_id)),
            0,
        )
        .await?;
        if reset {
            self.send(
                Packet::on_status("status", NS_PLAY_RESET, &format!("Playing and resetting {}", key)),
                stream_id,
            )
            .await?;
        }
        self.send(
            Packet::on_status("status", NS_PLAY_START, &format!("Started playing {}", key)),
            stream_id,
        )
        .await?;
        self.send(Packet::data_start(), stream_id).await?;

        // Attach last so the replayed headers follow the status messages
        let consumer = source.create_consumer();
        tracing::info!(
            session_id = self.ctx.session_id,
            stream = %key,
            consumer = consumer.id(),
            queued = consumer.queue_len(),
            "Playing started"
        );
        self.role = Role::Playing {
            key,
            consumer,
            stream_id,
        };
        Ok(())
    }

    async fn handle_pause(&mut self, paused: bool) -> Result<()> {
        let Role::Playing {
            consumer,
            stream_id,
            ..
        } = &self.role
        else {
            return Ok(());
        };

        let stream_id = *stream_id;
        consumer.pause(paused);

        if paused {
            self.send(
                Packet::on_status("status", NS_PAUSE_NOTIFY, "Paused stream."),
                stream_id,
            )
            .await?;
            self.send(Packet::UserControl(UserControlEvent::StreamEof(stream_id)), 0)
                .await
        } else {
            self.send(
                Packet::on_status("status", NS_UNPAUSE_NOTIFY, "Unpaused stream."),
                stream_id,
            )
            .await?;
            self.send(Packet::UserControl(UserControlEvent::StreamBegin(stream_id)), 0)
                .await
        }
    }

    /// Detach from the source this session publishes to or plays from
    async fn release(&mut self) {
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Idle => {}
            Role::Publishing { key, source } => {
                source.on_unpublish(self.ctx.session_id);
                self.handler.on_publish_stop(&self.ctx, &key).await;
            }
            Role::Playing { key, consumer, .. } => {
                tracing::info!(
                    session_id = self.ctx.session_id,
                    stream = %key,
                    dropped = consumer.dropped(),
                    "Playing stopped"
                );
                drop(consumer);
                self.handler.on_play_stop(&self.ctx, &key).await;
            }
        }
    }

    async fn maybe_acknowledge(&mut self) -> Result<()> {
        let window = self.peer_window_ack as u64;
        let total = self.read_buf.total_read();
        if window == 0 || total - self.acked_bytes < window {
            return Ok(());
        }

        self.acked_bytes = total;
        self.send(
            Packet::Acknowledgement {
                sequence: total as u32,
            },
            0,
        )
        .await
    }

    async fn send(&mut self, packet: Packet, stream_id: u32) -> Result<()> {
        let msg = packet.to_message(stream_id, 0);

        self.write_buf.clear();
        self.encoder.encode(&msg, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::DuplexStream;

    use crate::amf::{AmfObject, AmfValue};
    use crate::protocol::handshake::{client_handshake, HandshakeMode};
    use crate::server::handler::LoggingHandler;

    const WAIT: Duration = Duration::from_secs(5);

    /// Minimal client driving a server session over an in-memory pipe
    struct TestClient {
        stream: DuplexStream,
        buf: FastBuffer,
        decoder: ChunkDecoder,
        encoder: ChunkEncoder,
    }

    impl TestClient {
        async fn start(session_id: u64, registry: &Arc<SourceRegistry>) -> Self {
            let (client, server) = tokio::io::duplex(1 << 20);
            let config = ServerConfig::default().merged_write(1, Duration::from_millis(20));
            let registry = Arc::clone(registry);
            tokio::spawn(async move {
                let mut conn = Connection::new(
                    session_id,
                    server,
                    "127.0.0.1:50000".parse().unwrap(),
                    config,
                    Arc::new(LoggingHandler),
                    registry,
                );
                let _ = conn.run().await;
            });

            let mut client = Self {
                stream: client,
                buf: FastBuffer::new(),
                decoder: ChunkDecoder::new(),
                encoder: ChunkEncoder::new(),
            };
            client_handshake(&mut client.stream, &mut client.buf, HandshakeMode::Complex)
                .await
                .unwrap();
            client
        }

        async fn send(&mut self, packet: Packet, stream_id: u32, timestamp: u32) {
            let mut out = BytesMut::new();
            self.encoder
                .encode(&packet.to_message(stream_id, timestamp), &mut out);
            self.stream.write_all(&out).await.unwrap();
        }

        async fn recv(&mut self) -> Option<RtmpMessage> {
            loop {
                if let Some(msg) = self.decoder.decode(self.buf.bytes_mut()).unwrap() {
                    if let Ok(Packet::SetChunkSize(size)) = Packet::decode(&msg) {
                        self.decoder.set_chunk_size(size).unwrap();
                    }
                    return Some(msg);
                }
                if self.buf.fill(&mut self.stream).await.is_err() {
                    return None;
                }
            }
        }

        /// Skip messages until one matches
        async fn expect(&mut self, mut matches: impl FnMut(&RtmpMessage) -> bool) -> RtmpMessage {
            timeout(WAIT, async {
                loop {
                    let msg = self.recv().await.expect("connection closed");
                    if matches(&msg) {
                        return msg;
                    }
                }
            })
            .await
            .expect("timed out waiting for message")
        }

        async fn expect_status(&mut self, code: &str) {
            let code = code.to_string();
            self.expect(move |msg| match Packet::decode(msg) {
                Ok(Packet::OnStatus { info }) => {
                    info.get("code").and_then(AmfValue::as_str) == Some(code.as_str())
                }
                _ => false,
            })
            .await;
        }

        async fn connect(&mut self) {
            let object = AmfObject::new()
                .with("app", "live".into())
                .with("tcUrl", AmfValue::from("rtmp://127.0.0.1/live"));
            self.send(
                Packet::Connect {
                    transaction_id: 1.0,
                    params: ConnectParams::from_object(&object),
                },
                0,
                0,
            )
            .await;
            self.expect(|msg| matches!(Packet::decode(msg), Ok(Packet::Response { success: true, .. })))
                .await;
            self.send(Packet::CreateStream { transaction_id: 2.0 }, 0, 0)
                .await;
            self.expect(|msg| matches!(Packet::decode(msg), Ok(Packet::Response { success: true, .. })))
                .await;
        }

        async fn publish(&mut self, name: &str) {
            self.send(
                Packet::Publish {
                    transaction_id: 3.0,
                    stream_name: name.into(),
                    publish_type: "live".into(),
                },
                1,
                0,
            )
            .await;
        }

        async fn play(&mut self, name: &str) {
            self.send(
                Packet::Play {
                    transaction_id: 3.0,
                    stream_name: name.into(),
                    start: -2.0,
                    duration: -1.0,
                    reset: true,
                },
                1,
                0,
            )
            .await;
        }
    }

    fn key(stream: &str) -> StreamKey {
        StreamKey::new("__defaultVhost__", "live", stream)
    }

    async fn wait_for(registry: &SourceRegistry, stream: &str, check: impl Fn(&crate::live::SourceStats) -> bool) {
        timeout(WAIT, async {
            loop {
                if let Some(stats) = registry.stats(&key(stream)).await {
                    if check(&stats) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("source never reached expected state");
    }

    #[tokio::test]
    async fn test_connect_sequence() {
        let registry = Arc::new(SourceRegistry::default());
        let mut client = TestClient::start(1, &registry).await;

        let object = AmfObject::new().with("app", "live".into());
        client
            .send(
                Packet::Connect {
                    transaction_id: 1.0,
                    params: ConnectParams::from_object(&object),
                },
                0,
                0,
            )
            .await;

        let mut types = Vec::new();
        let result = client
            .expect(|msg| {
                types.push(msg.header.message_type);
                matches!(Packet::decode(msg), Ok(Packet::Response { .. }))
            })
            .await;

        assert_eq!(
            types,
            vec![
                MSG_SET_CHUNK_SIZE,
                MSG_WINDOW_ACK_SIZE,
                MSG_SET_PEER_BANDWIDTH,
                MSG_USER_CONTROL,
                MSG_COMMAND_AMF0
            ]
        );
        assert_eq!(client.decoder.chunk_size(), RECOMMENDED_CHUNK_SIZE);
        match Packet::decode(&result).unwrap() {
            Packet::Response { success, command } => {
                assert!(success);
                assert_eq!(command.transaction_id, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_then_play() {
        let registry = Arc::new(SourceRegistry::default());

        let mut publisher = TestClient::start(1, &registry).await;
        publisher.connect().await;
        publisher.publish("room").await;
        publisher.expect_status(NS_PUBLISH_START).await;

        let metadata = AmfValue::EcmaArray(AmfObject::new().with("width", AmfValue::Number(1280.0)));
        publisher.send(Packet::Metadata(metadata.clone()), 1, 0).await;
        publisher
            .send(Packet::Video(Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00, 0x01])), 1, 0)
            .await;
        publisher
            .send(Packet::Video(Bytes::from_static(&[0x17, 0x01, 0x00, 0x00, 0x00, 0xAA])), 1, 0)
            .await;
        wait_for(&registry, "room", |s| s.gop_messages == 1 && s.has_metadata).await;

        let mut player = TestClient::start(2, &registry).await;
        player.connect().await;
        player.play("room").await;
        player.expect_status(NS_PLAY_START).await;

        let first = player.expect(|msg| matches!(Packet::decode(msg), Ok(Packet::Metadata(_)))).await;
        assert_eq!(first.header.stream_id, 1);
        assert_eq!(Packet::decode(&first).unwrap(), Packet::Metadata(metadata));

        let sh = player.recv().await.unwrap();
        assert_eq!(sh.header.message_type, MSG_VIDEO);
        assert_eq!(sh.payload[1], 0x00);
        let keyframe = player.recv().await.unwrap();
        assert_eq!(keyframe.payload[1], 0x01);

        publisher
            .send(Packet::Video(Bytes::from_static(&[0x27, 0x01, 0x00, 0x00, 0x00, 0xBB])), 1, 40)
            .await;
        let inter = player.expect(|msg| msg.header.message_type == MSG_VIDEO).await;
        assert_eq!(inter.payload[0], 0x27);
        assert_eq!(inter.header.timestamp, 40);
    }

    #[tokio::test]
    async fn test_second_publisher_rejected() {
        let registry = Arc::new(SourceRegistry::default());

        let mut first = TestClient::start(1, &registry).await;
        first.connect().await;
        first.publish("busy").await;
        first.expect_status(NS_PUBLISH_START).await;

        let mut second = TestClient::start(2, &registry).await;
        second.connect().await;
        second.publish("busy").await;
        second.expect_status(NS_PUBLISH_BAD_NAME).await;

        // The rejected session is closed; the owner keeps the stream
        assert!(timeout(WAIT, async { while second.recv().await.is_some() {} }).await.is_ok());
        assert_eq!(registry.stats(&key("busy")).await.unwrap().publisher_id, Some(1));
    }

    #[tokio::test]
    async fn test_disconnect_releases_source() {
        let registry = Arc::new(SourceRegistry::default());

        let mut publisher = TestClient::start(1, &registry).await;
        publisher.connect().await;
        publisher.publish("gone").await;
        publisher.expect_status(NS_PUBLISH_START).await;

        let mut player = TestClient::start(2, &registry).await;
        player.connect().await;
        player.play("gone").await;
        player.expect_status(NS_PLAY_START).await;
        wait_for(&registry, "gone", |s| s.consumer_count == 1).await;

        drop(publisher);
        wait_for(&registry, "gone", |s| !s.has_publisher()).await;

        drop(player);
        wait_for(&registry, "gone", |s| s.consumer_count == 0).await;
    }

    #[tokio::test]
    async fn test_acknowledgement_window() {
        let registry = Arc::new(SourceRegistry::default());
        let mut client = TestClient::start(1, &registry).await;

        client.send(Packet::WindowAckSize(4096), 0, 0).await;
        client
            .send(Packet::Audio(Bytes::from(vec![0xAF; 5000])), 1, 0)
            .await;

        let ack = client
            .expect(|msg| msg.header.message_type == MSG_ACKNOWLEDGEMENT)
            .await;
        match Packet::decode(&ack).unwrap() {
            Packet::Acknowledgement { sequence } => assert!(sequence >= 4096),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_message_ignored() {
        let registry = Arc::new(SourceRegistry::default());
        let mut client = TestClient::start(1, &registry).await;

        let mut out = BytesMut::new();
        for message_type in [MSG_DATA_AMF0, MSG_COMMAND_AMF0, MSG_SET_CHUNK_SIZE] {
            let header = crate::protocol::chunk::MessageHeader::new(message_type, 0, 0);
            client
                .encoder
                .encode(&RtmpMessage::new(CSID_DATA, header, Bytes::new()), &mut out);
        }
        client.stream.write_all(&out).await.unwrap();

        // The session survives and still answers connect
        client.connect().await;
    }

    #[tokio::test]
    async fn test_chunk_size_applies_to_buffered_chunk() {
        let registry = Arc::new(SourceRegistry::default());
        let mut publisher = TestClient::start(1, &registry).await;
        publisher.connect().await;
        publisher.publish("big").await;
        publisher.expect_status(NS_PUBLISH_START).await;

        let mut payload = vec![0u8; 3000];
        payload[0] = 0x17;
        payload[1] = 0x01;

        // Both messages land in one write, the frame as a single chunk
        let mut out = BytesMut::new();
        publisher
            .encoder
            .encode(&Packet::SetChunkSize(4096).to_message(0, 0), &mut out);
        publisher.encoder.set_chunk_size(4096);
        publisher
            .encoder
            .encode(&Packet::Video(Bytes::from(payload)).to_message(1, 0), &mut out);
        publisher.stream.write_all(&out).await.unwrap();

        wait_for(&registry, "big", |s| s.gop_messages == 1 && s.gop_bytes == 3000).await;
    }

    #[tokio::test]
    async fn test_publish_requires_connect() {
        let registry = Arc::new(SourceRegistry::default());
        let mut client = TestClient::start(1, &registry).await;

        client.publish("early").await;
        assert!(timeout(WAIT, async { while client.recv().await.is_some() {} }).await.is_ok());
        assert!(registry.get(&key("early")).await.is_none());
    }
}
