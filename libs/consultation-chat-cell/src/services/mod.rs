// libs/consultation-chat-cell/src/services/mod.rs

pub mod access;
pub mod broadcaster;
pub mod directory;
pub mod gateway;
pub mod hub;
pub mod memory;
pub mod presence;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod store;

pub use access::AccessGuard;
pub use broadcaster::{RecordingBroadcaster, RoomBroadcaster};
pub use directory::{ConsultationDirectory, SupabaseConsultationDirectory};
pub use gateway::ConsultationGateway;
pub use hub::{ConnectionHub, ConnectionId};
pub use memory::{InMemoryDirectory, InMemoryMessageStore};
pub use presence::PresenceRegistry;
pub use registry::SessionRegistry;
pub use scheduler::{TimeoutScheduler, TimerHandle};
pub use session::{ConsultationSessionService, JoinedRoom};
pub use store::{MessageStore, SupabaseMessageStore};
