use axum::{
    Router,
    routing::get,
};

use consultation_chat_cell::{consultation_chat_routes, ConsultationChatState};

pub fn create_router(chat_state: ConsultationChatState) -> Router {
    Router::new()
        .route("/", get(|| async { "Amae consultation chat is running!" }))
        .nest("/consultations", consultation_chat_routes(chat_state))
}
