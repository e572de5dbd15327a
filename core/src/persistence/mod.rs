//! Message persistence boundary

pub mod memory;
pub mod message;

pub use memory::InMemoryMessageRepository;
pub use message::{Message, MessageStatus};

use crate::error::Result;
use async_trait::async_trait;

/// Storage for conversation messages.
///
/// During a turn the orchestrator only writes; history is read once before
/// the first segment.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &Message) -> Result<()>;

    /// Replace a stored message by id
    async fn update(&self, message: &Message) -> Result<()>;

    /// Messages of one conversation, oldest first
    async fn list_by_conversation(&self, conversation_id: &str) -> Result<Vec<Message>>;
}
