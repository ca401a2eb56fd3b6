//! Live origin server
//!
//! Run with: cargo run --example live_server [bind_addr]
//!
//! Publish:  ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test
//! Play:     ffplay rtmp://localhost/live/test

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rtmp_live::{
    AuthResult, JitterAlgorithm, LiveConfig, RtmpHandler, RtmpServer, ServerConfig,
    SessionContext, StreamKey, VhostSettings,
};

struct DemoHandler;

#[async_trait::async_trait]
impl RtmpHandler for DemoHandler {
    async fn on_publish(&self, ctx: &SessionContext, key: &StreamKey) -> AuthResult {
        if key.stream.is_empty() {
            return AuthResult::Reject("empty stream name".into());
        }
        tracing::info!(session_id = ctx.session_id, stream = %key, "Publish accepted");
        AuthResult::Accept
    }

    async fn on_play(&self, ctx: &SessionContext, key: &StreamKey) -> AuthResult {
        tracing::info!(session_id = ctx.session_id, stream = %key, "Play accepted");
        AuthResult::Accept
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_live=info".parse()?),
        )
        .init();

    let bind_addr: SocketAddr = match std::env::args().nth(1) {
        Some(addr) => addr.parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], 1935)),
    };

    // Low-latency vhost: no GOP cache, zeroed timestamps
    let live = LiveConfig::default()
        .vhost(
            "lowlatency",
            VhostSettings::default()
                .disable_gop_cache()
                .jitter(JitterAlgorithm::Zero, 0),
        )
        .cleanup_delay(Duration::from_secs(5));

    let server = Arc::new(RtmpServer::with_live_config(
        ServerConfig::with_addr(bind_addr),
        DemoHandler,
        Arc::new(live),
    ));

    let stats = {
        let registry = Arc::clone(server.registry());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                for (key, stats) in registry.all_stats().await {
                    tracing::info!(
                        stream = %key,
                        publishing = stats.has_publisher(),
                        consumers = stats.consumer_count,
                        gop_messages = stats.gop_messages,
                        "Source stats"
                    );
                }
            }
        })
    };

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    stats.abort();
    Ok(())
}
