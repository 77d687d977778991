//! HTTP+SSE client transport (spec.md §4.3 "HTTP client", grounded on the
//! session-id capture pattern in `runtime/http.rs`'s dispatcher).
//!
//! Every outbound frame is POSTed to a single MCP endpoint. The server may
//! reply with a single JSON body (request/response pairing over plain HTTP)
//! or, for requests that trigger server-initiated traffic, keep the
//! connection open as an `text/event-stream`; either way the bytes that
//! come back are pushed onto the same inbound queue `receive` drains.
//! Enabling streaming mode additionally opens a standalone GET SSE stream
//! for out-of-band server-initiated requests and notifications.

use crate::error::{TransportError, TransportResult};
use crate::traits::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

const SESSION_HEADER: &str = "Mcp-Session-Id";
const SSE_EVENT_PREFIX: &str = "data:";

/// HTTP client transport talking to a stateful or stateless MCP HTTP server.
#[derive(Debug)]
pub struct HttpClientTransport {
    endpoint: Url,
    client: Client,
    session_id: Mutex<Option<String>>,
    inbound_tx: mpsc::Sender<Bytes>,
    inbound_rx: Mutex<mpsc::Receiver<Bytes>>,
    streaming: bool,
    connected: std::sync::atomic::AtomicBool,
}

impl HttpClientTransport {
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        Self {
            endpoint,
            client: Client::new(),
            session_id: Mutex::new(None),
            inbound_tx: tx,
            inbound_rx: Mutex::new(rx),
            streaming: false,
            connected: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Open a standalone GET SSE stream in `connect`, for servers that push
    /// server-initiated requests and notifications outside of a POST
    /// response.
    #[must_use]
    pub fn with_standalone_stream(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// The session id captured from the server's last `Mcp-Session-Id`
    /// response header, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    async fn session_header(&self) -> Option<HeaderValue> {
        let guard = self.session_id.lock().await;
        guard
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
    }

    async fn capture_session_id(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(SESSION_HEADER) {
            if let Ok(value) = value.to_str() {
                *self.session_id.lock().await = Some(value.to_string());
            }
        }
    }

    async fn spawn_standalone_stream(&self) -> TransportResult<()> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(session) = self.session_header().await {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Http {
                status: response.status().as_u16(),
                message: response.status().to_string(),
            });
        }

        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buf = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(%err, "http: standalone SSE stream error");
                        break;
                    }
                };
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if let Some(frame) = parse_sse_line(&line) {
                        trace!(bytes = frame.len(), "http: standalone SSE frame");
                        if tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                }
            }
            debug!("http: standalone SSE stream ended");
        });
        Ok(())
    }
}

fn parse_sse_line(raw: &[u8]) -> Option<Bytes> {
    let line = std::str::from_utf8(raw).ok()?.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix(SSE_EVENT_PREFIX)?.trim_start();
    if data.is_empty() {
        return None;
    }
    Some(Bytes::from(data.to_string().into_bytes()))
}

#[async_trait]
impl Transport for HttpClientTransport {
    async fn connect(&self) -> TransportResult<()> {
        use std::sync::atomic::Ordering;
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyConnected);
        }
        if self.streaming {
            self.spawn_standalone_stream().await?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        use std::sync::atomic::Ordering;
        self.connected.store(false, Ordering::SeqCst);
        self.inbound_rx.lock().await.close();
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(frame.to_vec());
        let had_session = self.session_id.lock().await.is_some();
        if let Some(session) = self.session_header().await {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.capture_session_id(response.headers()).await;

        match response.status() {
            StatusCode::ACCEPTED => Ok(()),
            status if status.is_success() => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if content_type.starts_with("text/event-stream") {
                    let tx = self.inbound_tx.clone();
                    tokio::spawn(async move {
                        let mut stream = response.bytes_stream();
                        let mut buf = Vec::new();
                        while let Some(chunk) = stream.next().await {
                            let Ok(chunk) = chunk else { break };
                            buf.extend_from_slice(&chunk);
                            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                                let line: Vec<u8> = buf.drain(..=pos).collect();
                                if let Some(frame) = parse_sse_line(&line) {
                                    if tx.send(frame).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    });
                    Ok(())
                } else {
                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
                    self.inbound_tx
                        .send(Bytes::from(body.to_vec()))
                        .await
                        .map_err(|_| TransportError::ConnectionClosed)
                }
            }
            StatusCode::NOT_FOUND if had_session => {
                *self.session_id.lock().await = None;
                Err(TransportError::SessionExpired)
            }
            status => Err(TransportError::Http {
                status: status.as_u16(),
                message: status.to_string(),
            }),
        }
    }

    async fn receive(&self) -> TransportResult<Option<Bytes>> {
        Ok(self.inbound_rx.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_parsing_skips_blank_and_comment_lines() {
        assert!(parse_sse_line(b"\n").is_none());
        assert!(parse_sse_line(b": keep-alive\n").is_none());
        assert_eq!(
            parse_sse_line(b"data: {\"a\":1}\n").unwrap(),
            Bytes::from_static(b"{\"a\":1}")
        );
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let transport = HttpClientTransport::new(Url::parse("http://127.0.0.1:1/mcp").unwrap());
        transport.connect().await.unwrap();
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::AlreadyConnected)
        ));
    }
}
