//! Lark (Feishu) reply channel.
//!
//! Implements the reply surface as a streaming card: one card is created
//! per conversation, delivered into the chat (or as a reply to the inbound
//! message in group chats), and content is appended to its markdown element
//! with a strictly increasing sequence number. The platform animates the
//! reveal on its own.

pub mod lark;

pub use lark::{LarkChannel, LarkSurface};
