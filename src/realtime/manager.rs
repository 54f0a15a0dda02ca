//! Realtime connection manager.
//!
//! Owns one background task that drives the [`ConnectionMachine`]: it
//! acquires tokens, opens transport links, issues subscriptions, dispatches
//! inbound messages and runs the single retry timer. Callers talk to it
//! through [`RealtimeConnectionManager`] and observe it through a
//! [`watch`] channel of [`ConnectionStatus`].

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::auth::SessionTokenProvider;
use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::metrics::RealtimeMetrics;

use super::state::{
    Action, ConnectionEvent, ConnectionMachine, ConnectionState, ConnectionStatus, RetryPolicy,
};
use super::stomp::Heartbeat;
use super::subscription::{ActiveSubscriptions, InboundEvent, Listener, ListenerRegistry, Topic};
use super::timer::RetryTimer;
use super::transport::{
    ConnectRequest, StompTransport, Transport, TransportCommand, TransportEvent, TransportLink,
};

enum ManagerCommand {
    Connect,
    Disconnect,
    Publish {
        destination: String,
        body: String,
        reply: oneshot::Sender<Result<(), RealtimeError>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Result of async work, tagged with the generation that started it
struct Tagged {
    generation: u64,
    event: InternalEvent,
}

enum InternalEvent {
    Machine(ConnectionEvent),
    LinkOpened(TransportLink),
}

/// Builder for [`RealtimeConnectionManager`]
pub struct RealtimeConnectionManagerBuilder {
    config: RealtimeConfig,
    tokens: SessionTokenProvider,
    transport: Arc<dyn Transport>,
    topics: Vec<Topic>,
    listeners: Vec<(String, Listener)>,
}

impl RealtimeConnectionManagerBuilder {
    /// Replace the default STOMP transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Subscribe to a topic on every connection
    pub fn topic(mut self, topic: Topic) -> Self {
        if !self.topics.iter().any(|t| t.destination() == topic.destination()) {
            self.topics.push(topic);
        }
        self
    }

    /// The broadcast topic and the private notification queue from config
    pub fn notification_topics(self) -> Self {
        let broadcast = Topic::broadcast(self.config.broadcast_topic.clone());
        let private = Topic::private_queue(self.config.notification_queue.clone());
        self.topic(broadcast).topic(private)
    }

    /// Subscribe to a topic and register a listener for it
    pub fn subscribe<F>(self, topic: Topic, listener: F) -> Self
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let destination = topic.destination().to_string();
        let mut builder = self.topic(topic);
        builder.listeners.push((destination, Arc::new(listener)));
        builder
    }

    /// Spawn the manager task. Must be called inside a Tokio runtime.
    pub fn build(self) -> RealtimeConnectionManager {
        let registry = ListenerRegistry::new(self.topics);
        for (destination, listener) in self.listeners {
            // Every listener's topic was added alongside it
            let _ = registry.add_listener(&destination, listener);
        }
        let registry = Arc::new(registry);

        let machine = ConnectionMachine::new(RetryPolicy::from(&self.config));
        let (status_tx, status_rx) = watch::channel(machine.status());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let driver = ConnectionDriver {
            machine,
            config: self.config,
            tokens: self.tokens,
            transport: self.transport,
            listeners: registry.clone(),
            status_tx,
            internal_tx,
            timer: RetryTimer::new(),
            pending: None,
            link: None,
            active: ActiveSubscriptions::new(),
        };
        let task = tokio::spawn(driver.run(command_rx, internal_rx));

        RealtimeConnectionManager {
            commands: command_tx,
            status: status_rx,
            listeners: registry,
            task: Some(task),
        }
    }
}

/// Handle to the realtime connection.
///
/// Dropping the handle stops the background task, cancels any pending retry
/// and closes the link.
pub struct RealtimeConnectionManager {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    status: watch::Receiver<ConnectionStatus>,
    listeners: Arc<ListenerRegistry>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeConnectionManager {
    pub fn builder(
        config: RealtimeConfig,
        tokens: SessionTokenProvider,
    ) -> RealtimeConnectionManagerBuilder {
        RealtimeConnectionManagerBuilder {
            config,
            tokens,
            transport: Arc::new(StompTransport::new()),
            topics: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Start connecting. Resets the retry counter; ignored while a
    /// connection is already in progress or established.
    pub fn connect(&self) {
        let _ = self.commands.send(ManagerCommand::Connect);
    }

    /// Tear down the connection and cancel any pending retry
    pub fn disconnect(&self) {
        let _ = self.commands.send(ManagerCommand::Disconnect);
    }

    /// Send a JSON payload to a broker destination
    pub async fn publish<T: Serialize>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<(), RealtimeError> {
        let body = serde_json::to_string(payload)?;
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ManagerCommand::Publish {
                destination: destination.to_string(),
                body,
                reply,
            })
            .map_err(|_| RealtimeError::ManagerStopped)?;
        response.await.map_err(|_| RealtimeError::ManagerStopped)?
    }

    /// Register an additional listener for a configured topic
    pub fn add_listener<F>(&self, destination: &str, listener: F) -> Result<(), RealtimeError>
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.listeners.add_listener(destination, Arc::new(listener))
    }

    pub fn topics(&self) -> &[Topic] {
        self.listeners.topics()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Stream of status snapshots, starting with the current one
    pub fn status_stream(&self) -> WatchStream<ConnectionStatus> {
        WatchStream::new(self.status.clone())
    }

    /// Disconnect and wait for the background task to stop. Later commands
    /// are ignored.
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(ManagerCommand::Shutdown { done }).is_ok() {
            let _ = finished.await;
        }
    }
}

impl Drop for RealtimeConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ConnectionDriver {
    machine: ConnectionMachine,
    config: RealtimeConfig,
    tokens: SessionTokenProvider,
    transport: Arc<dyn Transport>,
    listeners: Arc<ListenerRegistry>,
    status_tx: watch::Sender<ConnectionStatus>,
    internal_tx: mpsc::UnboundedSender<Tagged>,
    timer: RetryTimer,
    /// Token acquisition in flight. Transport opens always run to completion;
    /// a superseded link is disconnected when it arrives.
    pending: Option<JoinHandle<()>>,
    link: Option<TransportLink>,
    active: ActiveSubscriptions,
}

async fn next_link_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link
            .events
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed {
                reason: Some("link dropped".to_string()),
            }),
        None => std::future::pending().await,
    }
}

impl ConnectionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ManagerCommand>,
        mut internal: mpsc::UnboundedReceiver<Tagged>,
    ) {
        tracing::debug!(url = %self.config.url, "Realtime manager started");
        let mut stopped = None;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ManagerCommand::Connect) => self.apply(ConnectionEvent::ConnectRequested),
                    Some(ManagerCommand::Disconnect) => self.apply(ConnectionEvent::DisconnectRequested),
                    Some(ManagerCommand::Publish { destination, body, reply }) => {
                        let _ = reply.send(self.publish(destination, body));
                    }
                    Some(ManagerCommand::Shutdown { done }) => {
                        self.apply(ConnectionEvent::DisconnectRequested);
                        stopped = Some(done);
                        break;
                    }
                    None => {
                        self.apply(ConnectionEvent::DisconnectRequested);
                        break;
                    }
                },
                Some(tagged) = internal.recv() => self.on_internal(tagged),
                event = next_link_event(&mut self.link) => self.on_link_event(event),
            }
        }

        drop(self);
        tracing::debug!("Realtime manager stopped");
        if let Some(done) = stopped {
            let _ = done.send(());
        }
    }

    fn on_internal(&mut self, tagged: Tagged) {
        if tagged.generation != self.machine.generation() {
            tracing::debug!(
                generation = tagged.generation,
                current = self.machine.generation(),
                "Discarding result from superseded attempt"
            );
            if let InternalEvent::LinkOpened(link) = tagged.event {
                let _ = link.commands.try_send(TransportCommand::Disconnect);
            }
            return;
        }

        match tagged.event {
            InternalEvent::Machine(event) => self.apply(event),
            InternalEvent::LinkOpened(link) => {
                tracing::debug!("Transport link open, waiting for broker");
                self.link = Some(link);
            }
        }
    }

    fn on_link_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.apply(ConnectionEvent::TransportConnected),
            TransportEvent::Message {
                subscription,
                destination,
                message_id,
                body,
            } => self.dispatch(subscription, destination, message_id, body),
            TransportEvent::ProtocolError { message, details } => {
                tracing::warn!(error = %message, details = %details, "STOMP error");
                self.apply(ConnectionEvent::ProtocolError { message });
            }
            TransportEvent::TransportError(reason) => {
                tracing::warn!(error = %reason, "WebSocket error");
                self.apply(ConnectionEvent::TransportFailed { reason });
            }
            TransportEvent::Closed { reason } => {
                tracing::info!(reason = ?reason, "WebSocket closed");
                self.apply(ConnectionEvent::TransportClosed { reason });
            }
            TransportEvent::GracefulDisconnect => {
                tracing::info!("Broker confirmed disconnect");
                self.apply(ConnectionEvent::GracefulDisconnect);
            }
        }
    }

    fn apply(&mut self, event: ConnectionEvent) {
        let before = self.machine.state();
        let actions = self.machine.handle(event);
        for action in actions {
            self.execute(action);
        }

        let status = self.machine.status();
        if status.state != before {
            tracing::info!(
                from = %before,
                to = %status.state,
                phase = %status.phase,
                retry_count = status.retry_count,
                "Realtime connection state changed"
            );
            RealtimeMetrics::record_transition(status.state.as_str(), status.is_connected);
            if status.state == ConnectionState::Failed {
                tracing::error!(
                    attempts = status.retry_count,
                    error = ?status.last_error,
                    "Giving up on realtime connection"
                );
            }
        }
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::AcquireToken => {
                self.abort_pending();
                let generation = self.machine.generation();
                let tokens = self.tokens.clone();
                let min_validity = self.config.min_token_validity;
                let tx = self.internal_tx.clone();
                self.pending = Some(tokio::spawn(async move {
                    let event = match tokens.refresh(min_validity).await {
                        Ok(token) => ConnectionEvent::TokenAcquired { token },
                        Err(e) => {
                            tracing::info!(error = %e, "Session not ready for realtime connection");
                            ConnectionEvent::TokenUnavailable { reason: e.to_string() }
                        }
                    };
                    let _ = tx.send(Tagged {
                        generation,
                        event: InternalEvent::Machine(event),
                    });
                }));
            }
            Action::OpenTransport { token } => {
                self.abort_pending();
                RealtimeMetrics::record_connect_attempt();
                let generation = self.machine.generation();
                let transport = self.transport.clone();
                let request = ConnectRequest {
                    url: self.config.url.clone(),
                    token,
                    heartbeat: Heartbeat::new(
                        self.config.heartbeat_outgoing_ms,
                        self.config.heartbeat_incoming_ms,
                    ),
                };
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let event = match transport.open(request).await {
                        Ok(link) => InternalEvent::LinkOpened(link),
                        Err(e) => InternalEvent::Machine(ConnectionEvent::TransportFailed {
                            reason: e.to_string(),
                        }),
                    };
                    let _ = tx.send(Tagged { generation, event });
                });
            }
            Action::EstablishSubscriptions => self.establish_subscriptions(),
            Action::ReleaseTransport => {
                self.abort_pending();
                self.active.clear();
                if let Some(link) = self.link.take() {
                    let _ = link.commands.try_send(TransportCommand::Disconnect);
                }
            }
            Action::ScheduleRetry(delay) => {
                let generation = self.machine.generation();
                let tx = self.internal_tx.clone();
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Retry scheduled");
                self.timer.schedule(delay, move || {
                    let _ = tx.send(Tagged {
                        generation,
                        event: InternalEvent::Machine(ConnectionEvent::RetryElapsed),
                    });
                });
            }
            Action::CancelRetry => {
                if self.timer.cancel() {
                    tracing::debug!("Pending retry cancelled");
                }
            }
        }
    }

    fn abort_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    fn establish_subscriptions(&mut self) {
        let Some(link) = self.link.as_ref() else {
            return;
        };
        let subject = self.tokens.subject();
        let planned = self.listeners.plan(subject.as_deref());

        for subscription in &planned {
            let command = TransportCommand::Subscribe {
                id: subscription.id.clone(),
                destination: subscription.destination.clone(),
            };
            if let Err(e) = link.commands.try_send(command) {
                tracing::warn!(
                    destination = %subscription.destination,
                    error = %e,
                    "Failed to issue subscription"
                );
            } else {
                tracing::info!(
                    id = %subscription.id,
                    destination = %subscription.destination,
                    "Subscribed"
                );
            }
        }
        self.active = planned;
    }

    fn dispatch(
        &self,
        subscription: String,
        destination: String,
        message_id: Option<String>,
        body: String,
    ) {
        let Some(active) = self.active.iter().find(|s| s.id == subscription) else {
            tracing::debug!(
                subscription = %subscription,
                destination = %destination,
                "Message for unknown subscription dropped"
            );
            return;
        };

        if body.trim().is_empty() {
            tracing::debug!(destination = %active.destination, "Empty message skipped");
            return;
        }

        let payload = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(e) => {
                RealtimeMetrics::record_parse_failure();
                tracing::warn!(
                    destination = %active.destination,
                    error = %e,
                    "Error parsing message body"
                );
                return;
            }
        };

        RealtimeMetrics::record_message(&active.destination);
        let event = InboundEvent {
            destination: active.destination.clone(),
            subscription,
            message_id,
            payload,
        };
        let delivered = self.listeners.dispatch(&event);
        tracing::debug!(
            destination = %event.destination,
            listeners = delivered,
            "Message dispatched"
        );
    }

    /// Never waits on the link; a stalled writer must not block the driver
    fn publish(&self, destination: String, body: String) -> Result<(), RealtimeError> {
        if self.machine.state() != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(RealtimeError::NotConnected)?;
        link.commands
            .try_send(TransportCommand::Send { destination, body })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!("Realtime link is not draining commands");
                    RealtimeError::Transport("link backpressure".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    RealtimeError::Transport("Link closed".to_string())
                }
            })
    }
}

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        self.abort_pending();
        if let Some(link) = self.link.take() {
            let _ = link.commands.try_send(TransportCommand::Disconnect);
        }
    }
}
