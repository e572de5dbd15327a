//! In-process message repository

use super::{Message, MessageRepository};
use crate::error::{Result, TurnError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keeps every conversation in memory, in insertion order
#[derive(Debug, Default)]
pub struct InMemoryMessageRepository {
    conversations: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create(&self, message: &Message) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let messages = conversations
            .entry(message.conversation_id.clone())
            .or_default();

        if messages.iter().any(|existing| existing.id == message.id) {
            return Err(TurnError::Persistence {
                message: format!("message {} already exists", message.id),
            }
            .into());
        }

        messages.push(message.clone());
        Ok(())
    }

    async fn update(&self, message: &Message) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let stored = conversations
            .get_mut(&message.conversation_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message.id));

        match stored {
            Some(stored) => {
                *stored = message.clone();
                Ok(())
            }
            None => Err(TurnError::Persistence {
                message: format!("message {} not found", message.id),
            }
            .into()),
        }
    }

    async fn list_by_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}
