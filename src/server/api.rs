use crate::analytics::UsageSnapshot;
use crate::server::{ AppState, API_KEY_HEADER };
use std::error::Error;
use std::net::SocketAddr;
use axum::{ routing::{ get, post }, Router, extract::State, http::{ HeaderMap, StatusCode }, Json };
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, warn, error };

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    pub api_key: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub has_credential: bool,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/analytics", get(analytics_handler))
        .route("/api/analytics/reset", post(reset_handler))
        .route("/api/credential", get(credential_status_handler).post(select_credential_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    http_port: u16,
    state: AppState
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(state);

    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    error!("HTTP server error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            }
        }
    });

    info!("HTTP server started");
    Ok(())
}

/// Mutating routes require the server API key, when one is configured, in `X-API-Key`.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(secret) = state.required_api_key() else {
        return Ok(());
    };
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) if key == secret => Ok(()),
        _ => {
            warn!("Rejected HTTP call without a valid API key");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn analytics_handler(State(state): State<AppState>) -> Json<UsageSnapshot> {
    let aggregator = state.analytics.lock().await;
    Json(aggregator.snapshot().clone())
}

async fn reset_handler(
    State(state): State<AppState>,
    headers: HeaderMap
) -> Result<Json<UsageSnapshot>, StatusCode> {
    authorize(&state, &headers)?;
    let mut aggregator = state.analytics.lock().await;
    aggregator.reset();
    info!("Analytics reset to seed values");
    Ok(Json(aggregator.snapshot().clone()))
}

async fn credential_status_handler(State(state): State<AppState>) -> Json<CredentialStatus> {
    Json(CredentialStatus {
        has_credential: state.agent.credentials().has_credential().await,
    })
}

/// Replaces the configured key used by connections without their own selection.
async fn select_credential_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CredentialRequest>
) -> Result<Json<CredentialStatus>, StatusCode> {
    authorize(&state, &headers)?;
    let credentials = state.agent.credentials();
    credentials.request_credential(req.api_key).await;
    Ok(
        Json(CredentialStatus {
            has_credential: credentials.has_credential().await,
        })
    )
}
