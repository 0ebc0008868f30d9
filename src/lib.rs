//! Panorama Library
//!
//! Core modules of the conversational analytics engine: the query catalog
//! and executor, the result cache, the agent pipeline (classifier → data
//! agent → presentation builder), the stream emitter, and chat memory.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::{Config, EngineConfig};
pub use services::llm::{LlmClient, LlmError, ProviderConfig};
pub use services::{
    ChatMemory, DataAgent, IntentClassifier, Orchestrator, PresentationBuilder, QueryCatalog,
    QueryExecutor, ResultCache,
};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI
/// container. All services are wrapped in Arc for cheap cloning and thread
/// safety.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub engine: EngineConfig,

    pub catalog: Arc<QueryCatalog>,
    pub cache: Arc<ResultCache>,
    pub memory: Arc<ChatMemory>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Wire the full service graph from a config and a database pool.
    pub fn build(config: &Config, pool: SqlitePool) -> anyhow::Result<Self> {
        let catalog = Arc::new(QueryCatalog::builtin()?);
        let executor = Arc::new(QueryExecutor::new(
            pool.clone(),
            config.engine.query_timeout_seconds,
        ));
        let cache = Arc::new(ResultCache::new(config.engine.cache_ttl_seconds));

        let llm = config
            .llm
            .primary
            .clone()
            .map(|primary| Arc::new(LlmClient::new(primary, config.llm.fallback.clone())));

        let classifier = Arc::new(IntentClassifier::new(
            llm.clone(),
            config.engine.clarify_on_ambiguity,
        ));
        let data_agent = Arc::new(DataAgent::new(
            Arc::clone(&catalog),
            executor,
            Arc::clone(&cache),
            llm.clone(),
            config.engine.use_llm_for_query_selection,
            config.engine.query_concurrency,
        ));
        let presenter = Arc::new(PresentationBuilder::new(
            llm,
            config.engine.use_llm_for_narrative,
        ));

        let memory_pool = config.memory.persist.then(|| pool.clone());
        let memory = Arc::new(ChatMemory::new(memory_pool));

        let orchestrator = Arc::new(Orchestrator::new(
            classifier,
            data_agent,
            presenter,
            Arc::clone(&memory),
            config.engine.request_deadline_seconds,
        ));

        Ok(Self {
            db: pool,
            engine: config.engine.clone(),
            catalog,
            cache,
            memory,
            orchestrator,
        })
    }
}
