//! Communication channels (the WhatsApp bridge).
//!
//! Channel trait and registry so the bot can start/stop channel connectors
//! and reply into a chat. Inbound messages are sent to the bot loop for command handling.

mod inbound;
mod registry;
mod reply;
mod whatsapp;

pub use inbound::InboundMessage;
pub use registry::{ChannelHandle, ChannelRegistry};
pub use reply::{ChannelReply, ReplySink};
pub use whatsapp::{BridgeCommand, BridgeEvent, WhatsAppChannel};
