pub mod api;
pub mod websocket;

use crate::agent::InsightAgent;
use crate::analytics::SharedAggregator;
use crate::cli::Args;
use std::error::Error;
use std::sync::Arc;

/// Header carrying the client API key on WebSocket handshakes and mutating HTTP calls.
pub const API_KEY_HEADER: &str = "x-api-key";

/// State shared by every connection and HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<InsightAgent>,
    pub analytics: SharedAggregator,
    /// Required from clients when set and non-empty.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn required_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.args.http_port {
            self.start_http_server(http_port).await?;
        }

        self.start_ws_server().await?;

        Ok(())
    }

    async fn start_http_server(&self, http_port: u16) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(http_port, self.state.clone()).await
    }

    async fn start_ws_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        websocket::start_ws_server(
            &self.addr,
            self.state.clone(),
            self.state.api_key.clone(),
            self.args.connections_per_second
        ).await
    }
}
