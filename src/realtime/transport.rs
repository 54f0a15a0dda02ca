//! Transport seam between the connection manager and the message broker.
//!
//! A [`Transport`] opens one link per connection attempt. The link reports
//! everything that happens on it as [`TransportEvent`]s and accepts
//! [`TransportCommand`]s. Links never reconnect on their own.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use url::Url;

use crate::error::RealtimeError;

use super::stomp::{Command, Frame, FrameDecoder, Heartbeat};

const EVENT_BUFFER_SIZE: usize = 256;
const COMMAND_BUFFER_SIZE: usize = 64;
const DISCONNECT_RECEIPT: &str = "disconnect-0";

/// Parameters for opening a link
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub token: String,
    pub heartbeat: Heartbeat,
}

impl ConnectRequest {
    /// Endpoint URL with the bearer token appended as `access_token`
    pub fn authenticated_url(&self) -> Result<Url, RealtimeError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| RealtimeError::Transport(format!("Invalid realtime URL: {}", e)))?;
        url.query_pairs_mut().append_pair("access_token", &self.token);
        Ok(url)
    }
}

/// Everything a link can report to the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the session (STOMP CONNECTED)
    Connected,
    Message {
        subscription: String,
        destination: String,
        message_id: Option<String>,
        body: String,
    },
    /// Broker-side failure (STOMP ERROR frame)
    ProtocolError {
        message: String,
        details: String,
    },
    /// Socket-level failure, including heart-beat timeout
    TransportError(String),
    /// Socket closed
    Closed { reason: Option<String> },
    /// Broker confirmed a client-initiated DISCONNECT
    GracefulDisconnect,
}

/// Commands accepted by a link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Subscribe { id: String, destination: String },
    Send { destination: String, body: String },
    Disconnect,
}

/// An open link: inbound events plus an outbound command sender
pub struct TransportLink {
    pub events: mpsc::Receiver<TransportEvent>,
    pub commands: mpsc::Sender<TransportCommand>,
}

impl TransportLink {
    pub fn new(
        events: mpsc::Receiver<TransportEvent>,
        commands: mpsc::Sender<TransportCommand>,
    ) -> Self {
        Self { events, commands }
    }
}

/// Opens links to the message broker
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the socket and start the broker handshake.
    ///
    /// Returns once the socket is open; `TransportEvent::Connected` follows on
    /// the link when the broker accepts the session.
    async fn open(&self, request: ConnectRequest) -> Result<TransportLink, RealtimeError>;
}

/// STOMP over WebSocket transport
#[derive(Debug, Default, Clone)]
pub struct StompTransport;

impl StompTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for StompTransport {
    #[tracing::instrument(name = "realtime.open", skip_all, fields(url = %request.url))]
    async fn open(&self, request: ConnectRequest) -> Result<TransportLink, RealtimeError> {
        let url = request.authenticated_url()?;
        let host = url.host_str().unwrap_or("localhost").to_string();

        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", request.token))
            .map_err(|e| RealtimeError::Transport(format!("Invalid token header: {}", e)))?;
        ws_request.headers_mut().insert(header::AUTHORIZATION, bearer);

        let (ws, _response) = connect_async(ws_request)
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        let (mut sink, stream) = ws.split();

        let connect = Frame::connect(&host, &request.token, request.heartbeat);
        sink.send(Message::text(connect.encode()))
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;

        tracing::debug!("WebSocket open, CONNECT sent");

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        tokio::spawn(run_link(sink, stream, command_rx, event_tx, request.heartbeat));

        Ok(TransportLink::new(event_rx, command_tx))
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn interval_after(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

/// Drive one WebSocket link until it closes or the manager releases it
async fn run_link<S, R>(
    mut sink: S,
    mut stream: R,
    mut commands: mpsc::Receiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
    requested: Heartbeat,
) where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    R: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut outgoing: Option<Interval> = None;
    let mut liveness: Option<Interval> = None;
    let mut incoming_window: Option<Duration> = None;
    let mut last_inbound = Instant::now();

    let final_event = loop {
        tokio::select! {
            message = stream.next() => {
                last_inbound = Instant::now();
                let text = match message {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => text.to_string(),
                        Err(e) => break Some(TransportEvent::TransportError(format!("Binary frame is not UTF-8: {}", e))),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break Some(TransportEvent::Closed { reason: frame.map(|f| f.reason.as_str().to_string()) });
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Some(TransportEvent::TransportError(e.to_string())),
                    None => break Some(TransportEvent::Closed { reason: None }),
                };

                let frames = match decoder.feed(&text) {
                    Ok(frames) => frames,
                    Err(e) => break Some(TransportEvent::ProtocolError { message: e.to_string(), details: text }),
                };

                let mut terminal = None;
                for frame in frames {
                    match frame.command {
                        Command::Connected => {
                            let server = frame
                                .get_header("heart-beat")
                                .and_then(Heartbeat::parse)
                                .unwrap_or_default();
                            let negotiated = Heartbeat::negotiate(requested, server);
                            tracing::debug!(
                                outgoing_ms = negotiated.outgoing_ms,
                                incoming_ms = negotiated.incoming_ms,
                                "STOMP session established"
                            );
                            outgoing = interval_after(negotiated.outgoing());
                            incoming_window = negotiated.incoming().map(|d| d * 2);
                            liveness = interval_after(negotiated.incoming());
                            if events.send(TransportEvent::Connected).await.is_err() {
                                terminal = Some(None);
                            }
                        }
                        Command::Message => {
                            let event = TransportEvent::Message {
                                subscription: frame.get_header("subscription").unwrap_or_default().to_string(),
                                destination: frame.get_header("destination").unwrap_or_default().to_string(),
                                message_id: frame.get_header("message-id").map(str::to_string),
                                body: frame.body,
                            };
                            if events.send(event).await.is_err() {
                                terminal = Some(None);
                            }
                        }
                        Command::Error => {
                            let message = frame.get_header("message").unwrap_or("STOMP error").to_string();
                            terminal = Some(Some(TransportEvent::ProtocolError { message, details: frame.body }));
                        }
                        Command::Receipt if frame.get_header("receipt-id") == Some(DISCONNECT_RECEIPT) => {
                            terminal = Some(Some(TransportEvent::GracefulDisconnect));
                        }
                        other => {
                            tracing::debug!(command = %other, "Ignoring unexpected frame");
                        }
                    }
                    if terminal.is_some() {
                        break;
                    }
                }
                if let Some(event) = terminal {
                    break event;
                }
            }
            command = commands.recv() => {
                let frame = match command {
                    Some(TransportCommand::Subscribe { id, destination }) => Frame::subscribe(&id, &destination),
                    Some(TransportCommand::Send { destination, body }) => Frame::send_json(&destination, body),
                    Some(TransportCommand::Disconnect) | None => {
                        let _ = sink.send(Message::text(Frame::disconnect(DISCONNECT_RECEIPT).encode())).await;
                        let _ = sink.close().await;
                        // Released by the manager; nobody is listening anymore
                        break None;
                    }
                };
                if let Err(e) = sink.send(Message::text(frame.encode())).await {
                    break Some(TransportEvent::TransportError(e.to_string()));
                }
            }
            _ = tick(&mut outgoing) => {
                if let Err(e) = sink.send(Message::text("\n".to_string())).await {
                    break Some(TransportEvent::TransportError(e.to_string()));
                }
            }
            _ = tick(&mut liveness) => {
                if let Some(window) = incoming_window {
                    if last_inbound.elapsed() > window {
                        break Some(TransportEvent::TransportError(format!(
                            "No heart-beat from broker for {}ms",
                            window.as_millis()
                        )));
                    }
                }
            }
        }
    };

    if let Some(event) = final_event {
        tracing::debug!(event = ?event, "Realtime link ended");
        let _ = events.send(event).await;
        let _ = sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_url_appends_token() {
        let request = ConnectRequest {
            url: "ws://localhost:8081/ws/websocket".to_string(),
            token: "abc.def".to_string(),
            heartbeat: Heartbeat::new(4000, 4000),
        };
        let url = request.authenticated_url().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8081/ws/websocket?access_token=abc.def");
    }

    #[test]
    fn test_invalid_url_is_transport_error() {
        let request = ConnectRequest {
            url: "not a url".to_string(),
            token: "t".to_string(),
            heartbeat: Heartbeat::default(),
        };
        assert!(matches!(
            request.authenticated_url(),
            Err(RealtimeError::Transport(_))
        ));
    }
}
