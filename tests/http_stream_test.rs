//! End-to-end tests against the HTTP server on an ephemeral port

mod common;

use anyhow::Result;
use common::{camera_feed, fake_factory, FakeBehavior};
use mpegts_streamer::config::Config;
use mpegts_streamer::server::{self, AppState};
use mpegts_streamer::stream::StreamControl;
use mpegts_streamer::ts::{ParsedPacket, PAT_PID, TS_PACKET_SIZE};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::sleep;

const TEST_CONFIG: &str = r#"
[server]
max_clients = 2
chunk_size = 1024

[server.headers]
"Cache-Control" = "no-cache"

[stream]
max_rate = 30

[[camera]]
id = 1
width = 32
height = 16

[[camera]]
id = 2
width = 32
height = 16
"#;

/// Server running in the background, stopped on drop
struct TestServer {
    addr: SocketAddr,
    state: AppState,
    stop: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(behavior: FakeBehavior) -> Result<Self> {
        let config = Config::from_str(TEST_CONFIG)?;
        let feeds = config
            .cameras
            .iter()
            .map(|c| camera_feed(c.id, c.width, c.height))
            .collect();
        let (factory, _) = fake_factory(behavior);
        let state = AppState::new(Arc::new(config), feeds, factory, StreamControl::new());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server::serve(listener, state.clone(), async {
            let _ = stopped.await;
        }));

        Ok(Self {
            addr,
            state,
            stop: Some(stop),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn wait_for_active(&self, expected: usize) -> bool {
        for _ in 0..50 {
            if self.state.registry().active() == expected {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.state.control().shutdown();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Reads at least `len` bytes of a streaming body
async fn read_at_least(response: &mut reqwest::Response, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while out.len() < len {
        match tokio::time::timeout(Duration::from_secs(5), response.chunk()).await?? {
            Some(chunk) => out.extend_from_slice(&chunk),
            None => break,
        }
    }
    Ok(out)
}

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let server = TestServer::start(FakeBehavior::default()).await?;

    let response = reqwest::get(server.url("/health")).await?;
    assert!(response.status().is_success());

    let body: Value = response.json().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_stream_headers_and_first_packets() -> Result<()> {
    let server = TestServer::start(FakeBehavior::default()).await?;

    let mut response = reqwest::get(server.url("/1/mpegts")).await?;
    assert_eq!(response.status(), 200);

    let headers = response.headers();
    assert_eq!(headers["content-type"], "application/octet-stream");
    assert_eq!(headers["content-transfer-encoding"], "BINARY");
    assert_eq!(headers["cache-control"], "no-cache");

    let bytes = read_at_least(&mut response, 4 * TS_PACKET_SIZE).await?;
    assert!(bytes.len() >= 4 * TS_PACKET_SIZE);
    let first = ParsedPacket::parse(&bytes[..TS_PACKET_SIZE]).unwrap();
    assert_eq!(first.pid, PAT_PID);
    for packet in bytes.chunks_exact(TS_PACKET_SIZE) {
        assert!(ParsedPacket::parse(packet).is_some());
    }
    Ok(())
}

#[tokio::test]
async fn test_streams_listing_and_release() -> Result<()> {
    let server = TestServer::start(FakeBehavior::default()).await?;

    let mut response = reqwest::get(server.url("/2/mpegts/substream")).await?;
    read_at_least(&mut response, TS_PACKET_SIZE).await?;

    let listing: Value = reqwest::get(server.url("/api/streams")).await?.json().await?;
    assert_eq!(listing["active"], 1);
    assert_eq!(listing["max_clients"], 2);
    assert_eq!(listing["streams"][0]["camera"], 2);
    assert_eq!(listing["streams"][0]["view"], "substream");

    drop(response);
    assert!(server.wait_for_active(0).await, "session slot not released");
    Ok(())
}

#[tokio::test]
async fn test_unknown_camera_or_view_is_not_found() -> Result<()> {
    let server = TestServer::start(FakeBehavior::default()).await?;

    for path in ["/9/mpegts", "/1/mpegts/bogus", "/x/mpegts", "/0/mpegts/motion"] {
        let response = reqwest::get(server.url(path)).await?;
        assert_eq!(response.status(), 404, "{path}");
    }
    Ok(())
}

#[tokio::test]
async fn test_mosaic_stream() -> Result<()> {
    let server = TestServer::start(FakeBehavior::default()).await?;

    let mut response = reqwest::get(server.url("/0/mpegts")).await?;
    assert_eq!(response.status(), 200);
    let bytes = read_at_least(&mut response, 3 * TS_PACKET_SIZE).await?;
    assert!(bytes.len() >= 3 * TS_PACKET_SIZE);
    Ok(())
}

#[tokio::test]
async fn test_capacity_exhausted() -> Result<()> {
    let server = TestServer::start(FakeBehavior::default()).await?;

    let first = reqwest::get(server.url("/1/mpegts")).await?;
    let second = reqwest::get(server.url("/1/mpegts/motion")).await?;
    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);

    let third = reqwest::get(server.url("/2/mpegts")).await?;
    assert_eq!(third.status(), 503);
    Ok(())
}

#[tokio::test]
async fn test_open_failure_is_server_error() -> Result<()> {
    let server = TestServer::start(FakeBehavior {
        fail_open: true,
        ..FakeBehavior::default()
    })
    .await?;

    let response = reqwest::get(server.url("/1/mpegts")).await?;
    assert_eq!(response.status(), 500);
    assert!(server.wait_for_active(0).await);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() -> Result<()> {
    let server = TestServer::start(FakeBehavior::default()).await?;

    let mut response = reqwest::get(server.url("/1/mpegts")).await?;
    read_at_least(&mut response, TS_PACKET_SIZE).await?;

    server.state.control().shutdown();
    // Returns once the body ends; a stream that keeps going would time out
    read_at_least(&mut response, usize::MAX).await?;
    assert!(server.wait_for_active(0).await);
    Ok(())
}
