use std::net::SocketAddr;

use anyhow::{Result, anyhow};
use axum::http::StatusCode;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A test WebSocket client that sends and receives JSON frames.
pub struct JsonSocket(WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>);

impl JsonSocket {
    pub async fn send(&mut self, msg: &Value) {
        self.0.send(msg.to_string().into()).await.unwrap();
    }

    pub async fn recv(&mut self) -> Result<Value> {
        let msg = self.0.next().await.ok_or_else(|| anyhow!("WebSocket closed"))??;
        let msg = msg.to_text().map_err(|_| anyhow!("non-string message"))?;
        Ok(serde_json::from_str(msg)?)
    }

    pub async fn recv_closed(&mut self) -> Result<()> {
        if let Some(Ok(Message::Close(_))) = self.0.next().await {
            Ok(())
        } else {
            Err(anyhow!("WebSocket should be closed"))
        }
    }
}

pub struct TestClient {
    client: reqwest::Client,
    addr: SocketAddr,
}

impl TestClient {
    pub async fn start(router: axum::Router) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(axum::serve(listener, router.layer(TraceLayer::new_for_http())).into_future());
        Ok(Self {
            client: reqwest::Client::new(),
            addr,
        })
    }

    pub async fn get(&self, path: &str) -> Result<String> {
        let url = format!("http://{}/{path}", self.addr);
        info!("GET {url}");
        let resp = self.client.get(&url).send().await?;
        assert_eq!(resp.status(), StatusCode::OK);
        Ok(resp.text().await?)
    }

    pub async fn connect(&self, token: &str) -> Result<JsonSocket> {
        let (socket, _response) =
            tokio_tungstenite::connect_async(format!("ws://{}/socket?token={token}", self.addr)).await?;
        Ok(JsonSocket(socket))
    }

    pub fn socket_url(&self) -> String {
        format!("ws://{}/socket", self.addr)
    }
}

pub fn logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .try_init()
        .ok();
}
