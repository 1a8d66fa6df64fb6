// libs/consultation-chat-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use shared_models::error::AppError;
use shared_utils::extractor::extract_bearer_token;

use crate::socket::run_socket;
use crate::state::ConsultationChatState;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

// ==============================================================================
// WEBSOCKET HANDSHAKE
// ==============================================================================

/// Upgrades to the consultation socket. The token is checked before the
/// upgrade so a bad handshake gets a plain HTTP error and no socket.
pub async fn consultation_socket(
    State(state): State<ConsultationChatState>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&headers, query.token.as_deref())?;

    let party = state.gateway.authenticate(&token).await.map_err(|e| {
        warn!("Consultation socket handshake rejected: {}", e);
        AppError::from(e)
    })?;

    let upgrade = upgrade.map_err(|e| AppError::BadRequest(e.to_string()))?;

    info!("Upgrading consultation socket for {}", party.name);
    let gateway = Arc::clone(&state.gateway);
    Ok(upgrade.on_upgrade(move |socket| run_socket(socket, gateway, party)))
}

// ==============================================================================
// HEALTH
// ==============================================================================

pub async fn chat_health_check(State(state): State<ConsultationChatState>) -> Json<Value> {
    let gateway = &state.gateway;
    let store_configured = state.config.is_store_configured();

    Json(json!({
        "status": if store_configured { "healthy" } else { "degraded" },
        "store_configured": store_configured,
        "active_sessions": gateway.sessions().active_sessions().await,
        "armed_timers": gateway.sessions().scheduler().armed_count(),
        "connected_clients": gateway.hub().connection_count(),
        "online_parties": gateway.presence().online_count(),
    }))
}
