//! 服务器共享状态

use std::sync::Arc;

use tollway_core::config::{BillingConfig, ServerConfig};
use tollway_core::GatewayStore;
use tollway_credential::CredentialPool;
use tollway_processor::RequestProcessor;
use tollway_services::Ledger;

use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<RequestProcessor>,
    pub store: Arc<dyn GatewayStore>,
    pub limiter: Arc<RateLimiter>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        processor: Arc<RequestProcessor>,
        store: Arc<dyn GatewayStore>,
        limiter: Arc<RateLimiter>,
        server: ServerConfig,
    ) -> Self {
        Self {
            processor,
            store,
            limiter,
            server: Arc::new(server),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        self.processor.ledger()
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        self.processor.pool()
    }

    pub fn billing(&self) -> &BillingConfig {
        self.ledger().billing()
    }
}
