use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::events::EventBroadcaster;
use crate::rate_limit::RateLimiter;
use crate::shared::utils::DbPool;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub events: EventBroadcaster,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig, conn: DbPool) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.queue.rate_limit_max,
            Duration::from_secs(config.queue.rate_limit_window_secs),
        ));
        Self {
            conn,
            config,
            events: EventBroadcaster::new(),
            rate_limiter,
        }
    }
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            rate_limiter: Arc::clone(&self.rate_limiter),
        }
    }
}
