//! Inbound message from a channel: delivered to the bot loop for command handling.

/// A message from a chat, handed to the command router.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    /// Originating chat (e.g. a WhatsApp chat id such as `123456789@c.us`).
    pub conversation_id: String,
    /// Id of the message in the chat, used to quote it in the reply.
    pub message_id: Option<String>,
    pub text: String,
}
