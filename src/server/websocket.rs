use crate::server::{ AppState, API_KEY_HEADER };
use crate::websocket::handle_connection;

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;

use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;

use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use url::form_urlencoded;

use log::{ info, warn, error };

const API_KEY_PARAM: &str = "api_key";
const DEFAULT_CONNECTIONS_PER_SECOND: u32 = 10;

type ConnectionLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn connection_limiter(per_second: u32) -> Arc<ConnectionLimiter> {
    let quota = NonZeroU32::new(per_second)
        .or_else(|| NonZeroU32::new(DEFAULT_CONNECTIONS_PER_SECOND))
        .map(Quota::per_second)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

pub async fn start_ws_server(
    addr: &str,
    state: AppState,
    api_key: Option<String>,
    connections_per_second: u32
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);
    serve(listener, state, api_key, connections_per_second).await
}

/// Accepts connections from an already bound listener until it fails.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    api_key: Option<String>,
    connections_per_second: u32
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let limiter = connection_limiter(connections_per_second);
    if api_key.as_deref().is_some_and(|k| !k.is_empty()) {
        info!("API key authentication enabled for WebSocket clients");
    }

    loop {
        let (stream, peer) = listener.accept().await?;

        if limiter.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let state = state.clone();
        let required_api_key = api_key.clone();

        tokio::spawn(async move {
            if let Err(e) = process_connection(peer, stream, state, required_api_key).await {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

fn provided_api_key(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get(API_KEY_HEADER) {
        return value.to_str().ok().map(str::to_string);
    }
    let qs = req.uri().query().unwrap_or("");
    form_urlencoded::parse(qs.as_bytes())
        .find(|(k, _)| k == API_KEY_PARAM)
        .map(|(_, v)| v.into_owned())
}

fn unauthorized(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    state: AppState,
    required_api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let secret = match &required_api_key {
            Some(k) if !k.is_empty() => k,
            _ => {
                return Ok(response);
            }
        };

        match provided_api_key(req) {
            Some(key) if &key == secret => Ok(response),
            Some(_) => {
                warn!("Invalid API key from {}", peer);
                Err(unauthorized("invalid api key"))
            }
            None => {
                warn!("Missing API key from {}", peer);
                Err(unauthorized("missing api key"))
            }
        }
    };

    let ws_stream = accept_hdr_async(stream, auth_callback).await?;
    handle_connection(peer, ws_stream, state).await;
    Ok(())
}
