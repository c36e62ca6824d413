//! Reply channel trait — the streaming reply surface for one conversation.
//!
//! One surface is created per conversation (not per round). Content chunks
//! are appended in display order; the channel implementation assigns each
//! chunk the next sequence number, strictly increasing from 1. The platform
//! may animate the reveal — that is opaque here.

use crate::error::ChannelError;
use crate::message::ChatType;
use async_trait::async_trait;

/// Where a reply surface should be delivered.
#[derive(Debug, Clone)]
pub struct ReplyTarget {
    /// The chat the conversation lives in
    pub chat_id: String,

    /// The inbound message id (group chats reply to it)
    pub message_id: String,

    /// P2p surfaces are sent to the chat; group surfaces reply to the message
    pub chat_type: ChatType,
}

/// An open reply surface. Appends are ordered;
/// the implementation owns the sequence counter.
#[async_trait]
pub trait ReplySurface: Send + Sync {
    /// Append one content chunk with the next sequence number.
    ///
    /// A transmission failure is surfaced to the caller but must be treated
    /// as non-fatal — the driver logs it and continues.
    async fn append(&self, text: &str) -> std::result::Result<(), ChannelError>;
}

/// Creates reply surfaces. One implementation per messaging platform.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    /// Create one user-visible streaming reply placeholder for the target
    /// and return a handle to append content through.
    async fn open_surface(
        &self,
        target: &ReplyTarget,
    ) -> std::result::Result<Box<dyn ReplySurface>, ChannelError>;
}

/// Cap `text` at `max_chars` characters for narration.
///
/// The cap applies to the text handed to the surface, not to what is stored
/// in the history. Cuts on a character boundary, never mid code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_text_unchanged() {
        assert_eq!(truncate_chars("hello", 1000), "hello");
    }

    #[test]
    fn truncate_long_text_caps_at_limit() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_chars(&long, 1000).chars().count(), 1000);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "工具执行结果非常长".repeat(200);
        let cut = truncate_chars(&text, 1000);
        assert_eq!(cut.chars().count(), 1000);
        // Slicing on a non-boundary would have panicked above
        assert!(text.starts_with(cut));
    }

    #[test]
    fn truncate_exact_length_unchanged() {
        let text = "a".repeat(1000);
        assert_eq!(truncate_chars(&text, 1000), text);
    }
}
