// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::backoff;
pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;

// Session and identity
pub mod auth;

// Realtime notifications and REST access
pub mod chat;
pub mod realtime;
pub mod rest;

// Supporting modules
pub mod telemetry;
