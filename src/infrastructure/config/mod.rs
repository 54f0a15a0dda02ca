mod settings;

pub use settings::{ApiConfig, IdentityConfig, LoggingConfig, RealtimeConfig, Settings};
