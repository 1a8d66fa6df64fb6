use std::sync::Arc;

use tracing::warn;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::services::{
    ConsultationDirectory, ConsultationGateway, InMemoryDirectory, InMemoryMessageStore,
    MessageStore, SupabaseConsultationDirectory, SupabaseMessageStore,
};

#[derive(Clone)]
pub struct ConsultationChatState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<ConsultationGateway>,
}

impl ConsultationChatState {
    /// Wires the Supabase-backed store and directory. Without a configured
    /// database the cell runs on empty in-memory backends.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        if !config.is_store_configured() {
            warn!("Supabase is not configured; consultation chat is using in-memory storage");
            return Self::with_components(
                config,
                Arc::new(InMemoryMessageStore::new()),
                Arc::new(InMemoryDirectory::new()),
            );
        }

        let supabase = Arc::new(SupabaseClient::new(&config));
        Self::with_components(
            Arc::clone(&config),
            Arc::new(SupabaseMessageStore::new(Arc::clone(&supabase))),
            Arc::new(SupabaseConsultationDirectory::new(supabase)),
        )
    }

    pub fn with_components(
        config: Arc<AppConfig>,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ConsultationDirectory>,
    ) -> Self {
        let gateway = Arc::new(ConsultationGateway::new(
            Arc::clone(&config),
            store,
            directory,
        ));
        Self { config, gateway }
    }
}
