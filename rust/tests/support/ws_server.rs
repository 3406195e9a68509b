#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// What the scripted server does in response to one client frame.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Close,
}

impl Reply {
    pub fn payload(id: serde_json::Value, text: &str) -> Self {
        Reply::Text(serde_json::json!({ "id": id, "text": text }).to_string())
    }
}

type Responder = Arc<dyn Fn(&str) -> Vec<Reply> + Send + Sync>;

/// Local WebSocket endpoint that answers each text frame from a script.
///
/// Runs on its own thread + runtime so tests can stay synchronous. Shut down on Drop.
pub struct TestServer {
    pub url: String,
    received: Arc<Mutex<Vec<String>>>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(respond: impl Fn(&str) -> Vec<Reply> + Send + Sync + 'static) -> Self {
        let respond: Responder = Arc::new(respond);
        let received = Arc::new(Mutex::new(Vec::new()));
        let (addr_tx, addr_rx) = std::sync::mpsc::channel::<SocketAddr>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let received_for_server = received.clone();
        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .expect("test server runtime");
            rt.block_on(async move {
                let listener = TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind test server");
                addr_tx
                    .send(listener.local_addr().expect("local addr"))
                    .expect("report addr");
                let accept_loop = async {
                    while let Ok((stream, _)) = listener.accept().await {
                        tokio::spawn(serve(
                            stream,
                            respond.clone(),
                            received_for_server.clone(),
                        ));
                    }
                };
                tokio::select! {
                    _ = accept_loop => {}
                    _ = shutdown_rx => {}
                }
            });
        });

        let addr = addr_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("test server did not start");
        eprintln!("[TestServer] listening on {addr}");

        Self {
            url: format!("ws://{addr}/ws"),
            received,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    /// Text frames received from clients, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve(stream: TcpStream, respond: Responder, received: Arc<Mutex<Vec<String>>>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    while let Some(Ok(msg)) = ws.next().await {
        let text = match msg {
            WsMessage::Text(t) => t.as_str().to_string(),
            WsMessage::Close(_) => return,
            _ => continue,
        };
        received.lock().unwrap().push(text.clone());
        for reply in respond(&text) {
            match reply {
                Reply::Text(frame) => {
                    if ws.send(WsMessage::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                Reply::Close => {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }
    }
}
