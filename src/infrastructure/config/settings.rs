use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub identity: IdentityConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OpenID Connect identity provider (Keycloak realm) settings
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_url")]
    pub url: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Credentials for the password grant used by the CLI
    pub username: Option<String>,
    pub password: Option<String>,
    /// Externally obtained refresh token, used instead of a password login
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Minimum remaining token lifetime (seconds) before a request triggers a refresh
    #[serde(default = "default_min_token_validity")]
    pub min_token_validity: u64,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// STOMP-over-WebSocket endpoint
    #[serde(default = "default_realtime_url")]
    pub url: String,
    #[serde(default = "default_broadcast_topic")]
    pub broadcast_topic: String,
    #[serde(default = "default_notification_queue")]
    pub notification_queue: String,
    #[serde(default = "default_chat_queue")]
    pub chat_queue: String,
    #[serde(default = "default_chat_destination")]
    pub chat_destination: String,
    /// Heart-beat the client expects from the broker, in milliseconds
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
    /// Heart-beat the client promises to send, in milliseconds
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    /// Consecutive failures before the manager gives up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Fixed delay before reconnecting after a dropped link
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_min_token_validity")]
    pub min_token_validity: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_identity_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_realm() -> String {
    "project-manager".to_string()
}

fn default_client_id() -> String {
    "project-manager-frontend".to_string()
}

fn default_api_base_url() -> String {
    "http://localhost:8081/api/v1".to_string()
}

fn default_min_token_validity() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_realtime_url() -> String {
    "ws://localhost:8081/ws/websocket".to_string()
}

fn default_broadcast_topic() -> String {
    "/topic/notifications".to_string()
}

fn default_notification_queue() -> String {
    "/user/queue/notifications".to_string()
}

fn default_chat_queue() -> String {
    "/user/queue/chat/messages".to_string()
}

fn default_chat_destination() -> String {
    "/app/chat/message".to_string()
}

fn default_heartbeat_ms() -> u64 {
    4000
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("identity.url", default_identity_url())?
            .set_default("identity.realm", default_realm())?
            .set_default("identity.client_id", default_client_id())?
            .set_default("api.base_url", default_api_base_url())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // PM_API__BASE_URL, PM_IDENTITY__USERNAME, PM_REALTIME__MAX_RETRIES, etc.
            .add_source(
                Environment::with_prefix("PM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl IdentityConfig {
    fn realm_endpoint(&self, endpoint: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/{}",
            self.url.trim_end_matches('/'),
            self.realm,
            endpoint
        )
    }

    pub fn token_endpoint(&self) -> String {
        self.realm_endpoint("token")
    }

    pub fn logout_endpoint(&self) -> String {
        self.realm_endpoint("logout")
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: default_identity_url(),
            realm: default_realm(),
            client_id: default_client_id(),
            client_secret: None,
            username: None,
            password: None,
            refresh_token: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            min_token_validity: default_min_token_validity(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            broadcast_topic: default_broadcast_topic(),
            notification_queue: default_notification_queue(),
            chat_queue: default_chat_queue(),
            chat_destination: default_chat_destination(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            min_token_validity: default_min_token_validity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
