use std::sync::Arc;

use crate::config::HubConfig;
use crate::dispatch::DispatchEngine;
use crate::registry::ConnectionRegistry;
use crate::store::StateStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<StateStore>,
    pub dispatch: Arc<DispatchEngine>,
}

impl AppState {
    pub fn new(config: HubConfig) -> Self {
        Self::with_dispatch(config, DispatchEngine::default())
    }

    pub fn with_dispatch(config: HubConfig, dispatch: DispatchEngine) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new(config.duplicate_policy)),
            store: Arc::new(StateStore::new()),
            dispatch: Arc::new(dispatch),
            config: Arc::new(config),
        }
    }
}
