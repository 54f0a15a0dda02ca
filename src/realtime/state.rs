//! Connection lifecycle as a pure state machine.
//!
//! [`ConnectionMachine::handle`] consumes one [`ConnectionEvent`] and returns
//! the [`Action`]s the driver must perform. The machine never touches the
//! network or the clock; the manager task feeds it events and executes its
//! actions.
//!
//! Every attempt runs under a generation number. The driver tags async work
//! with the generation current when it was started and drops results whose
//! tag no longer matches.

use std::fmt;
use std::time::Duration;

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::config::RealtimeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Authenticating,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnectRequested,
    DisconnectRequested,
    RetryElapsed,
    TokenAcquired { token: String },
    TokenUnavailable { reason: String },
    TransportConnected,
    TransportFailed { reason: String },
    ProtocolError { message: String },
    TransportClosed { reason: Option<String> },
    GracefulDisconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AcquireToken,
    OpenTransport { token: String },
    EstablishSubscriptions,
    ReleaseTransport,
    ScheduleRetry(Duration),
    CancelRetry,
}

/// Retry limits and delays
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failures before giving up
    pub max_retries: u32,
    /// Backoff between authentication attempts
    pub backoff: BackoffConfig,
    /// Fixed delay before reconnecting after a lost link
    pub reconnect_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for RetryPolicy {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: BackoffConfig {
                initial_delay_ms: config.initial_backoff_ms,
                max_delay_ms: config.max_backoff_ms,
                ..BackoffConfig::default()
            },
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }
}

/// Observable snapshot of the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Human-readable phase text
    pub phase: String,
    pub is_connected: bool,
    pub retry_count: u32,
    /// Reason for the most recent failure, cleared on connect
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    fn initial() -> Self {
        Self {
            state: ConnectionState::Idle,
            phase: "Initializing...".to_string(),
            is_connected: false,
            retry_count: 0,
            last_error: None,
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::initial()
    }
}

pub struct ConnectionMachine {
    policy: RetryPolicy,
    backoff: ExponentialBackoff,
    state: ConnectionState,
    phase: String,
    retry_count: u32,
    retry_pending: bool,
    generation: u64,
    last_error: Option<String>,
}

impl ConnectionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        let backoff = ExponentialBackoff::with_config(policy.backoff.clone());
        let initial = ConnectionStatus::initial();
        Self {
            policy,
            backoff,
            state: initial.state,
            phase: initial.phase,
            retry_count: 0,
            retry_pending: false,
            generation: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            phase: self.phase.clone(),
            is_connected: self.state == ConnectionState::Connected,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
        }
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<Action> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self.state, event) {
            (_, E::DisconnectRequested) => {
                self.generation += 1;
                self.retry_pending = false;
                self.enter(S::Disconnected, "Disconnected");
                vec![Action::CancelRetry, Action::ReleaseTransport]
            }

            (S::Idle | S::Disconnected | S::Failed, E::ConnectRequested) => {
                self.retry_count = 0;
                self.retry_pending = false;
                self.last_error = None;
                let mut actions = vec![Action::CancelRetry];
                actions.extend(self.begin_attempt());
                actions
            }

            (S::Authenticating | S::Disconnected, E::RetryElapsed) if self.retry_pending => {
                self.retry_pending = false;
                self.begin_attempt()
            }

            (S::Authenticating, E::TokenAcquired { token }) if !self.retry_pending => {
                self.enter(S::Connecting, "Authenticated - connecting to WebSocket...");
                vec![Action::OpenTransport { token }]
            }

            (S::Authenticating, E::TokenUnavailable { reason }) if !self.retry_pending => {
                self.retry_count += 1;
                self.last_error = Some(reason);
                if self.retry_count >= self.policy.max_retries {
                    self.enter(S::Failed, "Max retries reached - authentication failed");
                    return Vec::new();
                }
                self.retry_pending = true;
                self.phase = format!(
                    "Waiting for authentication... ({}/{})",
                    self.retry_count, self.policy.max_retries
                );
                vec![Action::ScheduleRetry(self.backoff.delay_for_attempt(self.retry_count))]
            }

            (S::Connecting, E::TransportConnected) => {
                self.retry_count = 0;
                self.last_error = None;
                self.enter(S::Connected, "Connected to WebSocket");
                vec![Action::EstablishSubscriptions]
            }

            (S::Connecting | S::Connected, E::TransportFailed { reason }) => {
                self.connection_lost("WebSocket connection error", reason)
            }
            (S::Connecting | S::Connected, E::ProtocolError { message }) => {
                self.connection_lost("STOMP connection error", message)
            }
            (S::Connecting | S::Connected, E::TransportClosed { reason }) => self.connection_lost(
                "WebSocket connection closed",
                reason.unwrap_or_else(|| "closed".to_string()),
            ),
            (S::Connecting | S::Connected, E::GracefulDisconnect) => {
                self.connection_lost("Disconnected from WebSocket", "broker disconnected".to_string())
            }

            _ => Vec::new(),
        }
    }

    fn enter(&mut self, state: ConnectionState, phase: &str) {
        self.state = state;
        self.phase = phase.to_string();
    }

    fn begin_attempt(&mut self) -> Vec<Action> {
        self.generation += 1;
        self.enter(ConnectionState::Authenticating, "Authenticating...");
        vec![Action::AcquireToken]
    }

    fn connection_lost(&mut self, phase: &str, reason: String) -> Vec<Action> {
        self.generation += 1;
        self.retry_count += 1;
        self.last_error = Some(reason);

        if self.retry_count >= self.policy.max_retries {
            self.retry_pending = false;
            self.enter(ConnectionState::Failed, &format!("{} - retry limit reached", phase));
            return vec![Action::ReleaseTransport];
        }

        self.retry_pending = true;
        self.state = ConnectionState::Disconnected;
        self.phase = format!(
            "{} - reconnecting in {}s ({}/{})",
            phase,
            self.policy.reconnect_delay.as_secs(),
            self.retry_count,
            self.policy.max_retries
        );
        vec![
            Action::ReleaseTransport,
            Action::ScheduleRetry(self.policy.reconnect_delay),
        ]
    }
}
