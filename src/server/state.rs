use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::hub::{Broadcaster, ConnectionRegistry, FanoutTask};
use crate::websocket::OriginPolicy;

/// Shared application state, constructed once and handed to the router.
///
/// Owning the registry and broadcaster here (instead of process-wide
/// globals) lets tests build isolated instances side by side.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Broadcaster,
    pub origin_policy: Arc<OriginPolicy>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the shared state plus the fan-out task, which the caller must
    /// spawn once for the process lifetime.
    pub fn new(settings: Settings) -> (Self, FanoutTask) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (broadcaster, fanout) = Broadcaster::channel(registry.clone(), settings.hub.clone());
        let origin_policy = Arc::new(OriginPolicy::allow_list(
            settings.server.allowed_origins.clone(),
        ));

        (
            Self {
                settings: Arc::new(settings),
                registry,
                broadcaster,
                origin_policy,
                start_time: Instant::now(),
            },
            fanout,
        )
    }

    /// Replace the origin predicate, e.g. with a custom policy supplied by
    /// the embedding application.
    pub fn with_origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = Arc::new(policy);
        self
    }
}
