//! Local stand-in for the chat endpoint.
//!
//! Accepts WebSocket connections and answers every text frame by streaming a reply as
//! `{"id", "text"}` frames: one id per reply, each frame carrying the full text so far.
//!
//! usage: mock_backend [--listen 127.0.0.1:8000] [--chunk-delay-ms 80]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut listen = "127.0.0.1:8000".to_string();
    let mut chunk_delay = Duration::from_millis(80);
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        if a == "--listen" {
            listen = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("--listen requires host:port"))?;
            continue;
        }
        if a == "--chunk-delay-ms" {
            let n = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("--chunk-delay-ms requires a number"))?;
            chunk_delay = Duration::from_millis(n.parse()?);
            continue;
        }
        return Err(anyhow::anyhow!("unknown arg: {a}"));
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(listen, chunk_delay))
}

async fn run(listen: String, chunk_delay: Duration) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&listen).await?;
    tracing::info!(addr = %listener.local_addr()?, "mock backend listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = serve(stream, chunk_delay).await {
                tracing::warn!(%peer, error = %format!("{e:#}"), "connection ended with error");
            }
        });
    }
}

async fn serve(stream: TcpStream, chunk_delay: Duration) -> anyhow::Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    tracing::info!("client connected");
    while let Some(msg) = ws.next().await {
        let prompt = match msg? {
            WsMessage::Text(t) => t.as_str().to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        tracing::info!(len = prompt.len(), "prompt received");

        let reply_id = uuid::Uuid::new_v4().to_string();
        let mut so_far = String::new();
        for chunk in reply_chunks(&prompt) {
            so_far.push_str(&chunk);
            let frame = serde_json::json!({ "id": reply_id, "text": so_far });
            ws.send(WsMessage::Text(frame.to_string().into())).await?;
            tokio::time::sleep(chunk_delay).await;
        }
    }
    tracing::info!("client disconnected");
    Ok(())
}

/// Word-sized pieces of the canned reply, whitespace kept attached.
fn reply_chunks(prompt: &str) -> Vec<String> {
    let reply = format!("You said: **{}**", prompt.trim());
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in reply.chars() {
        current.push(ch);
        if ch == ' ' {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
