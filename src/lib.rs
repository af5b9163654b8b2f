pub mod access;
pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod identity;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::identity::{Backends, IdentityProvider, ProfileStore};

pub struct AppState {
    pub config: Config,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn ProfileStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, backends: Backends) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            identity: backends.identity,
            store: backends.store,
            rate_limiter,
        }
    }
}
