// libs/consultation-chat-cell/src/router.rs
use axum::{routing::get, Router};

use crate::handlers::*;
use crate::state::ConsultationChatState;

/// Socket authentication happens in the handshake handler itself, so no
/// route here sits behind middleware.
pub fn consultation_chat_routes(state: ConsultationChatState) -> Router {
    Router::new()
        .route("/ws", get(consultation_socket))
        .route("/health", get(chat_health_check))
        .with_state(state)
}
