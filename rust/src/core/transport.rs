// WebSocket channel between the core and the remote endpoint.
//
// Wire contract: client -> server frames are the raw message text. Server -> client frames are
// JSON objects `{"id": <string|number>, "text": <string>}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::Sender;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::updates::{CoreMsg, InternalEvent};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to `{endpoint}`: {message}")]
    Connect { endpoint: String, message: String },
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("failed to receive frame: {0}")]
    Receive(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// One server -> client frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundPayload {
    #[serde(deserialize_with = "crate::state::deserialize_message_id")]
    pub id: String,
    pub text: String,
}

pub fn decode_inbound_payload(raw: &str) -> Result<InboundPayload, TransportError> {
    serde_json::from_str(raw).map_err(|e| TransportError::MalformedPayload(e.to_string()))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outbound {
    Text(String),
    Close,
}

/// Handle to one connection task. One per mount; a dropped connection is never re-dialed.
pub(crate) struct TransportHandle {
    token: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl TransportHandle {
    pub(crate) fn open(
        runtime: &tokio::runtime::Handle,
        endpoint: String,
        token: u64,
        core_sender: Sender<CoreMsg>,
    ) -> Self {
        crate::tls::init_rustls_crypto_provider();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        runtime.spawn(run_connection(
            endpoint,
            token,
            outbound_rx,
            open.clone(),
            core_sender,
        ));
        Self {
            token,
            outbound,
            open,
        }
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Fire-and-forget. Returns false when there is no live connection to hand the frame to.
    pub(crate) fn send(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    /// Asks the task to close the socket. Does not wait for it.
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Close);
    }

    /// An already-open handle with no socket behind it; frames land on the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached_for_tests(token: u64) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let handle = Self {
            token,
            outbound,
            open: Arc::new(AtomicBool::new(true)),
        };
        (handle, outbound_rx)
    }
}

fn notify(core_sender: &Sender<CoreMsg>, event: InternalEvent) {
    let _ = core_sender.send(CoreMsg::Internal(Box::new(event)));
}

fn forward_inbound(core_sender: &Sender<CoreMsg>, channel: u64, raw: &str) {
    let event = match decode_inbound_payload(raw) {
        Ok(payload) => InternalEvent::PayloadReceived { channel, payload },
        Err(error) => InternalEvent::MalformedPayload { channel, error },
    };
    notify(core_sender, event);
}

async fn run_connection(
    endpoint: String,
    channel: u64,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    core_sender: Sender<CoreMsg>,
) {
    tracing::info!(endpoint = %endpoint, channel, "transport: connecting");
    let socket = match connect_async(endpoint.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            let err = TransportError::Connect {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            };
            tracing::warn!(channel, error = %err, "transport: connect failed");
            notify(
                &core_sender,
                InternalEvent::ChannelClosed {
                    channel,
                    reason: Some(err.to_string()),
                },
            );
            return;
        }
    };
    open.store(true, Ordering::SeqCst);
    tracing::info!(channel, "transport: open");
    notify(&core_sender, InternalEvent::ChannelOpened { channel });

    let (mut sink, mut stream) = socket.split();
    let reason: Option<String> = loop {
        tokio::select! {
            out = outbound_rx.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                        break Some(TransportError::Send(e.to_string()).to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break None;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(payload))) => {
                    forward_inbound(&core_sender, channel, payload.as_str());
                }
                Some(Ok(WsMessage::Binary(payload))) => match std::str::from_utf8(&payload) {
                    Ok(raw) => forward_inbound(&core_sender, channel, raw),
                    Err(e) => notify(
                        &core_sender,
                        InternalEvent::MalformedPayload {
                            channel,
                            error: TransportError::MalformedPayload(e.to_string()),
                        },
                    ),
                },
                Some(Ok(WsMessage::Ping(payload))) => {
                    if let Err(e) = sink.send(WsMessage::Pong(payload)).await {
                        break Some(TransportError::Send(e.to_string()).to_string());
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    break Some("closed by remote".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break Some(TransportError::Receive(e.to_string()).to_string());
                }
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    tracing::info!(channel, reason = ?reason, "transport: closed");
    notify(&core_sender, InternalEvent::ChannelClosed { channel, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn decodes_string_and_numeric_ids() {
        let p = decode_inbound_payload(r#"{"id":"abc","text":"hi"}"#).unwrap();
        assert_eq!(p.id, "abc");
        assert_eq!(p.text, "hi");

        let p = decode_inbound_payload(r#"{"id":42,"text":"final answer"}"#).unwrap();
        assert_eq!(p.id, "42");
    }

    #[test]
    fn ignores_unknown_fields() {
        let p = decode_inbound_payload(r#"{"id":"a","text":"b","model":"x"}"#).unwrap();
        assert_eq!(
            p,
            InboundPayload {
                id: "a".into(),
                text: "b".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        for raw in [
            "not json",
            r#"{"text":"no id"}"#,
            r#"{"id":"no text"}"#,
            r#"{"id":true,"text":"bool id"}"#,
            r#"{"id":null,"text":"null id"}"#,
        ] {
            let err = decode_inbound_payload(raw).unwrap_err();
            assert!(matches!(err, TransportError::MalformedPayload(_)), "{raw}");
        }
    }

    async fn next_internal(rx: &flume::Receiver<CoreMsg>) -> InternalEvent {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .expect("timed out waiting for core message")
            .expect("core channel closed");
        match msg {
            CoreMsg::Internal(ev) => *ev,
            CoreMsg::Action(a) => panic!("unexpected action {a:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn relays_frames_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let text = first.into_text().unwrap().as_str().to_string();
            ws.send(WsMessage::Text("garbage".to_string().into()))
                .await
                .unwrap();
            ws.send(WsMessage::Text(
                serde_json::json!({"id": 7, "text": format!("echo: {text}")})
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();
            text
        });

        let (core_tx, core_rx) = flume::unbounded();
        let handle = TransportHandle::open(
            &tokio::runtime::Handle::current(),
            format!("ws://{addr}/ws"),
            3,
            core_tx,
        );

        assert!(matches!(
            next_internal(&core_rx).await,
            InternalEvent::ChannelOpened { channel: 3 }
        ));
        assert!(handle.send("hello".into()));

        match next_internal(&core_rx).await {
            InternalEvent::MalformedPayload { channel, .. } => assert_eq!(channel, 3),
            other => panic!("expected malformed payload, got {other:?}"),
        }
        match next_internal(&core_rx).await {
            InternalEvent::PayloadReceived { channel, payload } => {
                assert_eq!(channel, 3);
                assert_eq!(payload.id, "7");
                assert_eq!(payload.text, "echo: hello");
            }
            other => panic!("expected payload, got {other:?}"),
        }
        assert_eq!(server.await.unwrap(), "hello");

        // Server task ended and dropped the socket.
        assert!(matches!(
            next_internal(&core_rx).await,
            InternalEvent::ChannelClosed { channel: 3, .. }
        ));
        assert!(!handle.is_open());
        assert!(!handle.send("late".into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connect_failure_reports_closed() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let (core_tx, core_rx) = flume::unbounded();
        let handle = TransportHandle::open(
            &tokio::runtime::Handle::current(),
            format!("ws://{addr}/ws"),
            1,
            core_tx,
        );
        match next_internal(&core_rx).await {
            InternalEvent::ChannelClosed { channel, reason } => {
                assert_eq!(channel, 1);
                assert!(reason.unwrap().contains("failed to connect"));
            }
            other => panic!("expected closed, got {other:?}"),
        }
        assert!(!handle.send("dropped".into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn secure_endpoint_attempts_tls_handshake() {
        // Plain TCP peer: the client gets as far as the TLS handshake, which then fails.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let (core_tx, core_rx) = flume::unbounded();
        let _handle = TransportHandle::open(
            &tokio::runtime::Handle::current(),
            format!("wss://{addr}/ws"),
            1,
            core_tx,
        );
        match next_internal(&core_rx).await {
            InternalEvent::ChannelClosed { channel, reason } => {
                assert_eq!(channel, 1);
                let reason = reason.unwrap();
                assert!(reason.contains("failed to connect"), "{reason}");
                assert!(!reason.contains("TLS support not compiled in"), "{reason}");
            }
            other => panic!("expected closed, got {other:?}"),
        }
        server.await.unwrap();
    }
}
