//! Realtime notifications over STOMP/WebSocket

mod manager;
mod state;
pub mod stomp;
mod subscription;
mod timer;
pub mod transport;

pub use manager::{RealtimeConnectionManager, RealtimeConnectionManagerBuilder};
pub use state::{
    Action, ConnectionEvent, ConnectionMachine, ConnectionState, ConnectionStatus, RetryPolicy,
};
pub use subscription::{ActiveSubscription, InboundEvent, Listener, ListenerRegistry, Topic};
pub use timer::RetryTimer;
pub use transport::{
    ConnectRequest, StompTransport, Transport, TransportCommand, TransportEvent, TransportLink,
};
