//! WebSocket client for the heart-rate endpoint.
//!
//! [`HrsSocket`] is bound to one server and the fixed [`WS_PATH`]. Call
//! [`HrsSocket::start`] to connect and get a channel of [`SocketEvent`]s;
//! [`HrsSocket::stop`] tears the connection down. The client never sends
//! application messages and does not reconnect on its own.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::message::{WsMessage, WS_PATH};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Upper bound on the opening handshake.
    pub connect_timeout: Duration,
    /// Buffered events before the reader waits on the consumer.
    pub channel_capacity: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 64,
        }
    }
}

/// Close code and reason sent by the server, if it sent a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Message(WsMessage),
    /// Terminal; no events follow.
    Closed(Option<CloseInfo>),
}

/// Map an `http(s)`/`ws(s)` base URL onto the endpoint URL.
pub fn endpoint_url(base_url: &str) -> Result<String> {
    let base = base_url.trim().trim_end_matches('/');
    let (scheme, rest) = base
        .split_once("://")
        .ok_or_else(|| Error::InvalidUrl(base_url.to_string()))?;

    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(Error::InvalidUrl(base_url.to_string())),
    };
    if rest.is_empty() {
        return Err(Error::InvalidUrl(base_url.to_string()));
    }

    Ok(format!("{ws_scheme}://{rest}{WS_PATH}"))
}

pub struct HrsSocket {
    url: String,
    options: SocketOptions,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HrsSocket {
    pub fn new(base_url: &str, options: SocketOptions) -> Result<Self> {
        Ok(Self {
            url: endpoint_url(base_url)?,
            options,
            cancel: CancellationToken::new(),
            task: None,
        })
    }

    /// Full endpoint URL, e.g. `ws://127.0.0.1:11642/api/v1/ws`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect and start delivering events. A running connection is
    /// stopped first.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<SocketEvent>> {
        self.stop().await;

        let (ws_stream, _response) =
            tokio::time::timeout(self.options.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| Error::ConnectTimeout(self.url.clone()))??;
        tracing::info!(url = %self.url, "Connected to heart rate server");

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        // Fresh channel, cannot be full.
        let _ = tx.try_send(SocketEvent::Open);

        self.cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(read_loop(
            ws_stream,
            tx,
            self.cancel.clone(),
            self.url.clone(),
        )));

        Ok(rx)
    }

    /// Close the connection. Safe to call when not started.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "WebSocket reader task failed");
            }
        }
    }
}

impl Drop for HrsSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(
    mut ws_stream: WsStream,
    tx: mpsc::Sender<SocketEvent>,
    cancel: CancellationToken,
    url: String,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_stream.next() => frame,
        };

        let event = match frame {
            Some(Ok(Message::Text(text))) => match WsMessage::decode(&text) {
                Ok(msg) => SocketEvent::Message(msg),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, payload = %text, "Ignoring undecodable message");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(url = %url, ?frame, "WebSocket closed by server");
                SocketEvent::Closed(frame.map(|f| CloseInfo {
                    code: u16::from(f.code),
                    reason: f.reason.into_owned(),
                }))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "WebSocket receive error");
                SocketEvent::Closed(None)
            }
            None => SocketEvent::Closed(None),
        };

        let closed = matches!(event, SocketEvent::Closed(_));
        // A full channel must not keep stop() waiting.
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(event) => sent,
        };
        if sent.is_err() || closed {
            return;
        }
    }

    if let Err(e) = ws_stream.close(None).await {
        tracing::debug!(url = %url, error = %e, "Close handshake failed");
    }
    tracing::info!(url = %url, "WebSocket stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn http_base_maps_to_ws() {
        assert_eq!(
            endpoint_url("http://127.0.0.1:11642").unwrap(),
            "ws://127.0.0.1:11642/api/v1/ws"
        );
        assert_eq!(
            endpoint_url("https://example.com/").unwrap(),
            "wss://example.com/api/v1/ws"
        );
    }

    #[test]
    fn ws_base_is_kept() {
        assert_eq!(
            endpoint_url("wss://example.com/hr").unwrap(),
            "wss://example.com/hr/api/v1/ws"
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert_matches!(endpoint_url("ftp://host"), Err(Error::InvalidUrl(_)));
        assert_matches!(endpoint_url("localhost:8080"), Err(Error::InvalidUrl(_)));
        assert_matches!(endpoint_url("http://"), Err(Error::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let mut socket = HrsSocket::new("http://127.0.0.1:1", SocketOptions::default()).unwrap();
        socket.stop().await;
        socket.stop().await;
    }

    #[tokio::test]
    async fn start_fails_when_nothing_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut socket = HrsSocket::new(&format!("http://{addr}"), SocketOptions::default()).unwrap();
        assert!(socket.start().await.is_err());
    }
}
