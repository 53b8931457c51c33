//! End-to-end tests: a running bridge fed by a scripted device, driven by
//! real WebSocket clients.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use serial_scale_bridge::device::ScriptedFeed;
use serial_scale_bridge::{Bridge, Error, ScriptedDevice};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::Span;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

// ============================================================================
// Helpers
// ============================================================================

async fn start_bridge() -> Result<(Bridge, ScriptedFeed, SocketAddr)> {
    let (device, feed) = ScriptedDevice::new("scripted0");
    let bridge = Bridge::builder()
        .bind_addr("127.0.0.1:0".parse()?)
        .poll_interval(Duration::from_millis(10))
        .stop_timeout(Duration::from_secs(1))
        .drain_timeout(Duration::from_secs(1))
        .device(device)
        .span(Span::none())
        .build()?;

    bridge.start().await?;
    let addr = bridge.local_addr().context("running bridge has an address")?;
    Ok((bridge, feed, addr))
}

async fn connect(addr: SocketAddr) -> Result<Client> {
    let (client, _) = connect_async(format!("ws://{addr}/ws?token=test-token")).await?;
    Ok(client)
}

async fn wait_for_sessions(bridge: &Bridge, expected: usize) -> Result<()> {
    timeout(WAIT, async {
        while bridge.status().session_count != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .with_context(|| format!("expected {expected} sessions"))
}

/// Returns the next text frame, skipping control frames.
async fn next_text(client: &mut Client) -> Result<String> {
    loop {
        let frame = timeout(WAIT, client.next())
            .await
            .context("timed out waiting for a frame")?
            .context("stream ended")??;

        match frame {
            WsMessage::Text(text) => return Ok(text.to_string()),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => bail!("unexpected frame: {other:?}"),
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    timeout(WAIT, stream.read_to_string(&mut response)).await??;
    Ok(response)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn ping_is_answered_with_same_payload() -> Result<()> {
    let (bridge, _feed, addr) = start_bridge().await?;
    let mut client = connect(addr).await?;

    client
        .send(WsMessage::text(r#"{"type":"ping","payload":{"seq":7}}"#))
        .await?;
    assert_eq!(next_text(&mut client).await?, r#"{"type":"pong","payload":{"seq":7}}"#);

    client.send(WsMessage::text(r#"{"type":"ping"}"#)).await?;
    assert_eq!(next_text(&mut client).await?, r#"{"type":"pong"}"#);

    bridge.stop().await?;
    Ok(())
}

#[tokio::test]
async fn sync_reply_goes_only_to_sender() -> Result<()> {
    let (bridge, _feed, addr) = start_bridge().await?;
    let mut sender = connect(addr).await?;
    let mut other = connect(addr).await?;
    wait_for_sessions(&bridge, 2).await?;

    sender
        .send(WsMessage::text(r#"{"type":"sync-to-self","payload":{"id":1}}"#))
        .await?;
    assert_eq!(
        next_text(&mut sender).await?,
        r#"{"type":"sync-from-self","payload":"pong"}"#
    );

    let leaked = timeout(Duration::from_millis(200), other.next()).await;
    assert!(leaked.is_err(), "other client received {leaked:?}");

    bridge.stop().await?;
    Ok(())
}

#[tokio::test]
async fn readings_are_broadcast_to_every_client() -> Result<()> {
    let (bridge, feed, addr) = start_bridge().await?;
    let mut first = connect(addr).await?;
    let mut second = connect(addr).await?;
    wait_for_sessions(&bridge, 2).await?;

    feed.push("not a reading");
    feed.push("WTST    0.842   kg\r\n");

    for client in [&mut first, &mut second] {
        let text = next_text(client).await?;
        let frame: serde_json::Value = serde_json::from_str(&text)?;

        assert_eq!(frame["type"], "scale_data");
        let payload = &frame["payload"];
        assert_eq!(payload["scale_data"]["value"], 0.842);
        assert_eq!(payload["scale_data"]["unit"], "kg");
        assert_eq!(payload["scale_data"]["type"], "WTST");
        assert_eq!(payload["raw_data"], "WTST    0.842   kg");
        assert_eq!(payload["port"], "scripted0");
        assert!(payload["timestamp"].as_i64().context("timestamp")? > 0);
    }

    bridge.stop().await?;
    Ok(())
}

#[tokio::test]
async fn upgrade_without_token_is_rejected() -> Result<()> {
    let (bridge, _feed, addr) = start_bridge().await?;

    match connect_async(format!("ws://{addr}/ws")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        other => bail!("expected 401, got {other:?}"),
    }
    assert_eq!(bridge.status().session_count, 0);

    bridge.stop().await?;
    Ok(())
}

#[tokio::test]
async fn health_reports_connected_clients() -> Result<()> {
    let (bridge, _feed, addr) = start_bridge().await?;
    let _client = connect(addr).await?;
    wait_for_sessions(&bridge, 1).await?;

    let response = http_get(addr, "/health").await?;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with(r#"{"status":"ok","connected_clients":1}"#), "{response}");

    bridge.stop().await?;
    Ok(())
}

#[tokio::test]
async fn frames_over_512_bytes_close_the_session() -> Result<()> {
    let (bridge, _feed, addr) = start_bridge().await?;
    let mut client = connect(addr).await?;
    wait_for_sessions(&bridge, 1).await?;

    let fits = format!(r#"{{"type":"ping","payload":"{}"}}"#, "a".repeat(450));
    assert!(fits.len() < 512);
    client.send(WsMessage::text(fits.clone())).await?;
    assert_eq!(next_text(&mut client).await?, fits.replacen("ping", "pong", 1));

    let oversize = format!(r#"{{"type":"ping","payload":"{}"}}"#, "a".repeat(600));
    client.send(WsMessage::text(oversize)).await?;

    let closed = timeout(WAIT, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(WsMessage::Text(text))) => return Err(text.to_string()),
                Some(Ok(_)) => {}
            }
        }
        Ok(())
    })
    .await;
    assert!(matches!(closed, Ok(Ok(()))), "oversize frame was answered: {closed:?}");
    wait_for_sessions(&bridge, 0).await?;

    bridge.stop().await?;
    Ok(())
}

#[tokio::test]
async fn disconnect_unregisters_session() -> Result<()> {
    let (bridge, _feed, addr) = start_bridge().await?;
    let mut client = connect(addr).await?;
    wait_for_sessions(&bridge, 1).await?;

    client.close(None).await?;
    wait_for_sessions(&bridge, 0).await?;

    bridge.stop().await?;
    Ok(())
}

#[tokio::test]
async fn stop_closes_clients_and_restart_is_clean() -> Result<()> {
    let (bridge, _feed, addr) = start_bridge().await?;
    let mut client = connect(addr).await?;
    wait_for_sessions(&bridge, 1).await?;
    let hub = bridge.hub().context("running bridge has a hub")?;

    bridge.stop().await?;
    assert_eq!(hub.count(), 0);
    assert!(matches!(
        hub.broadcast(serial_scale_bridge::Message::sync_reply()).await,
        Err(Error::HubClosed)
    ));

    let closed = timeout(WAIT, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "client was not closed by stop");

    assert!(matches!(bridge.stop().await, Err(Error::NotRunning)));

    bridge.start().await?;
    let status = bridge.status();
    assert!(status.running);
    assert_eq!(status.session_count, 0);
    assert!(matches!(bridge.start().await, Err(Error::AlreadyRunning)));

    bridge.stop().await?;
    Ok(())
}
