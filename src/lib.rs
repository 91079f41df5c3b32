//! mirrorgate library -- redundant content retrieval across GitHub, GitLab
//! and R2.
//!
//! A request for a file is raced against every configured backend; the
//! first success is returned, with credentials scrubbed, and cached.  A
//! secret path renders a concurrent health report of every backend.

use std::sync::Arc;

pub mod cache;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod race;
pub mod server;
pub mod signer;
pub mod sources;
pub mod status;
pub mod upstream;

use crate::cache::{CacheGate, ResponseCache};
use crate::config::Config;
use crate::sources::Catalog;
use crate::upstream::Upstream;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Usable backends, resolved once from the configuration.
    pub catalog: Arc<Catalog>,
    /// Outbound HTTP transport.
    pub upstream: Arc<dyn Upstream>,
    /// Response cache and its background store tracker.
    pub cache: CacheGate,
}

impl AppState {
    pub fn new(config: Config, upstream: Arc<dyn Upstream>, cache: Arc<dyn ResponseCache>) -> Self {
        let catalog = Arc::new(Catalog::from_config(&config));
        let cache = CacheGate::new(cache, &config.cache);
        Self {
            config,
            catalog,
            upstream,
            cache,
        }
    }
}
