//! Assistant chat over the realtime link, with a REST fallback

use std::sync::Arc;

use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::error::{ClientError, RealtimeError};
use crate::realtime::{InboundEvent, RealtimeConnectionManager, Topic};
use crate::rest::{ApiClient, ChatMessage, ChatMessageRequest};

/// How a chat message was delivered
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelivery {
    /// Published to the broker; the reply arrives on the private chat queue
    Realtime,
    /// Sent over REST; the reply is returned directly
    Reply(ChatMessage),
}

pub struct ChatClient {
    api: ApiClient,
    realtime: Arc<RealtimeConnectionManager>,
    destination: String,
}

impl ChatClient {
    pub fn new(api: ApiClient, realtime: Arc<RealtimeConnectionManager>, config: &RealtimeConfig) -> Self {
        Self {
            api,
            realtime,
            destination: config.chat_destination.clone(),
        }
    }

    /// The private queue assistant replies are delivered on
    pub fn reply_topic(config: &RealtimeConfig) -> Topic {
        Topic::private_queue(config.chat_queue.clone())
    }

    /// Send a message, preferring the realtime link
    pub async fn send(
        &self,
        message: &str,
        session_id: Option<Uuid>,
    ) -> Result<ChatDelivery, ClientError> {
        let request = ChatMessageRequest {
            message: message.to_string(),
            session_id,
        };

        if self.realtime.is_connected() {
            match self.realtime.publish(&self.destination, &request).await {
                Ok(()) => {
                    tracing::debug!(destination = %self.destination, "Chat message published");
                    return Ok(ChatDelivery::Realtime);
                }
                Err(RealtimeError::NotConnected) | Err(RealtimeError::Transport(_)) => {
                    tracing::info!("Realtime link unavailable, sending chat message over REST");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let reply = self.api.send_chat_message(&request).await?;
        Ok(ChatDelivery::Reply(reply))
    }
}

/// Adapt a typed reply handler into a realtime listener
pub fn reply_listener<F>(handler: F) -> impl Fn(&InboundEvent) + Send + Sync + 'static
where
    F: Fn(ChatMessage) + Send + Sync + 'static,
{
    move |event: &InboundEvent| match event.decode::<ChatMessage>() {
        Ok(message) => handler(message),
        Err(e) => tracing::warn!(error = %e, "Chat reply did not match the message format"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::MessageRole;
    use std::sync::Mutex;

    #[test]
    fn test_reply_listener_decodes_messages() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let listener = reply_listener(move |message| sink.lock().unwrap().push(message));

        listener(&InboundEvent {
            destination: "/user/queue/chat/messages".to_string(),
            subscription: "user-u-2".to_string(),
            message_id: None,
            payload: serde_json::json!({"content": "Hello!", "role": "ASSISTANT"}),
        });
        listener(&InboundEvent {
            destination: "/user/queue/chat/messages".to_string(),
            subscription: "user-u-2".to_string(),
            message_id: None,
            payload: serde_json::json!(["not", "a", "message"]),
        });

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].content, "Hello!");
        assert_eq!(received[0].role, Some(MessageRole::Assistant));
    }

    #[test]
    fn test_reply_topic_is_private() {
        let topic = ChatClient::reply_topic(&RealtimeConfig::default());
        assert!(topic.is_private());
        assert_eq!(topic.destination(), "/user/queue/chat/messages");
    }
}
