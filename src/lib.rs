pub mod analytics;
pub mod api_router;
pub mod config;
pub mod events;
pub mod feedback;
pub mod queue;
pub mod rate_limit;
pub mod shared;
pub mod windows;
