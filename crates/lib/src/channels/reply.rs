//! Reply sink: where a command's response goes.

use crate::channels::registry::ChannelHandle;
use async_trait::async_trait;
use std::sync::Arc;

/// Sends plain text back to the chat a command came from.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, text: &str) -> Result<(), String>;
}

/// Reply sink bound to one conversation on a channel. Quotes the original message when its id is known.
pub struct ChannelReply {
    handle: Arc<dyn ChannelHandle>,
    conversation_id: String,
    message_id: Option<String>,
}

impl ChannelReply {
    pub fn new(
        handle: Arc<dyn ChannelHandle>,
        conversation_id: impl Into<String>,
        message_id: Option<String>,
    ) -> Self {
        Self {
            handle,
            conversation_id: conversation_id.into(),
            message_id,
        }
    }
}

#[async_trait]
impl ReplySink for ChannelReply {
    async fn reply(&self, text: &str) -> Result<(), String> {
        match self.message_id.as_deref() {
            Some(id) => self.handle.reply_to(&self.conversation_id, id, text).await,
            None => self.handle.send_message(&self.conversation_id, text).await,
        }
    }
}
