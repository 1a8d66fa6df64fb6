// libs/consultation-chat-cell/src/lib.rs
//! # Consultation Chat Cell
//!
//! Live, time-boxed text consultations between a patient and a doctor over a
//! WebSocket. The consultation itself (checkout, payment, parties, planned
//! duration) is created elsewhere; this cell runs the session once both
//! parties are in the room.
//!
//! ## Architecture
//!
//! ```text
//! +----------------------------------------------------------+
//! |                 Consultation Chat Cell                   |
//! +----------------------------------------------------------+
//! |  handlers.rs        |  Socket handshake + health         |
//! |  socket.rs          |  Per-connection read/write loop    |
//! |  events.rs          |  Wire protocol                     |
//! |  services/                                               |
//! |    gateway.rs       |  Auth, event routing, disconnects  |
//! |    access.rs        |  Payment + membership checks       |
//! |    session.rs       |  Lifecycle and message operations  |
//! |    registry.rs      |  Live sessions + state machine     |
//! |    scheduler.rs     |  One timeout per consultation      |
//! |    store.rs         |  Durable message log               |
//! |    hub.rs           |  Connections, rooms, fan-out       |
//! +----------------------------------------------------------+
//! ```
//!
//! ## Session lifecycle
//!
//! `waiting` → `active` when the doctor starts it, then `active` → `ended`
//! when the patient ends it or the planned duration runs out. An ended
//! consultation never restarts. Start and end are recorded as system messages
//! in the log, and those markers are what a restarted process recovers from.
//!
//! ## Endpoints
//!
//! - `GET /consultations/ws` - WebSocket, token in `Authorization: Bearer` or `?token=`
//! - `GET /consultations/health` - Session, timer and connection counts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use consultation_chat_cell::{consultation_chat_routes, ConsultationChatState};
//! use shared_config::AppConfig;
//! use std::sync::Arc;
//!
//! let config = Arc::new(AppConfig::from_env());
//! let state = ConsultationChatState::from_config(config);
//! let routes = consultation_chat_routes(state);
//! ```

pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod socket;
pub mod state;

pub use error::{ConsultationError, ErrorKind};
pub use events::{ClientEvent, ServerEvent};
pub use models::{Actor, DeliveryStatus, EndReason, Message, Party, SessionState};
pub use router::consultation_chat_routes;
pub use services::{ConsultationGateway, ConsultationSessionService, MessageStore};
pub use state::ConsultationChatState;
