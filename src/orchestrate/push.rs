// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Push WebSocket from a widget back to the host.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push endpoint of a widget on `port`.
pub fn push_url(port: u16) -> String {
    format!("ws://127.0.0.1:{}/ws", port)
}

/// Open the socket within `timeout`.
pub async fn connect(url: &str, timeout: Duration) -> Result<PushStream, String> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("connect timed out after {}ms", timeout.as_millis())),
    }
}

/// Text frames are JSON when they parse, otherwise a JSON string.
pub fn decode_payload(message: Message) -> Option<Value> {
    match message {
        Message::Text(text) => {
            Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        }
        Message::Binary(bytes) => serde_json::from_slice(&bytes).ok(),
        _ => None,
    }
}

/// How a pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// The host asked for the socket to close.
    Shutdown,
    /// The widget side went away.
    Closed,
}

/// Deliver payloads until the socket closes or `shutdown` fires.
pub async fn pump<F>(
    mut stream: PushStream,
    shutdown: &mut oneshot::Receiver<()>,
    mut on_payload: F,
) -> PumpEnd
where
    F: FnMut(Value),
{
    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                if let Err(e) = stream.close(None).await {
                    tracing::debug!("push socket close failed: {}", e);
                }
                return PumpEnd::Shutdown;
            }
            // Pings are answered by tungstenite itself.
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    if let Some(payload) = decode_payload(message) {
                        on_payload(payload);
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!("push socket error: {}", e);
                    return PumpEnd::Closed;
                }
                None => return PumpEnd::Closed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as WsMessage, WebSocketUpgrade};
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    async fn greet(upgrade: WebSocketUpgrade) -> Response {
        upgrade.on_upgrade(|mut socket| async move {
            let _ = socket
                .send(WsMessage::Text(r#"{"type":"refresh"}"#.to_string()))
                .await;
            let _ = socket.send(WsMessage::Text("plain".to_string())).await;
            let _ = socket.send(WsMessage::Close(None)).await;
        })
    }

    #[test]
    fn test_push_url() {
        assert_eq!(push_url(3100), "ws://127.0.0.1:3100/ws");
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(
            decode_payload(Message::Text(r#"{"a":1}"#.to_string())),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            decode_payload(Message::Text("hi".to_string())),
            Some(json!("hi"))
        );
        assert_eq!(decode_payload(Message::Ping(vec![1])), None);
    }

    #[tokio::test]
    async fn test_pump_delivers_until_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/ws", get(greet)))
                .await
                .unwrap();
        });

        let stream = connect(&push_url(port), Duration::from_secs(5))
            .await
            .unwrap();
        let (_tx, mut rx) = oneshot::channel();
        let mut payloads = Vec::new();
        let end = pump(stream, &mut rx, |payload| payloads.push(payload)).await;

        assert_eq!(end, PumpEnd::Closed);
        assert_eq!(payloads, vec![json!({"type": "refresh"}), json!("plain")]);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(connect(&push_url(port), Duration::from_secs(2)).await.is_err());
    }
}
