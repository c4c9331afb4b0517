use std::sync::Arc;

use crate::{
    auth::TokenRegistry,
    backend::{catalog::ModelCatalog, proxy::ChatProxy},
    config::{AppConfig, UpstreamConfig},
    metrics::AppMetrics,
    store::{memory::MemoryStore, Store},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub proxy: Arc<ChatProxy>,
    pub catalog: Arc<ModelCatalog>,
    pub store: Arc<dyn Store>,
    pub tokens: Arc<TokenRegistry>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new<S>(config: AppConfig, store: Arc<S>) -> Result<Self, String>
    where
        S: Store + 'static,
    {
        let store: Arc<dyn Store> = store;
        let proxy = ChatProxy::new(config.upstream.clone())?;
        let catalog = ModelCatalog::new(config.upstream.clone())?;
        Ok(Self {
            tokens: Arc::new(TokenRegistry::new(config.token_ttl)),
            config: Arc::new(config),
            proxy: Arc::new(proxy),
            catalog: Arc::new(catalog),
            store,
            metrics: Arc::new(AppMetrics::new()),
        })
    }

    /// In-memory store and default chat settings, pointed at `upstream`.
    ///
    /// For test harnesses only; servers go through [`crate::build_state`].
    ///
    /// # Panics
    ///
    /// When the HTTP clients cannot be built, which [`AppState::new`] reports
    /// as an error instead.
    pub fn new_for_tests(upstream: UpstreamConfig) -> Self {
        Self::new(AppConfig::for_tests(upstream), Arc::new(MemoryStore::new()))
            .expect("test state should build")
    }
}
