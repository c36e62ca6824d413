//! # larkrelay Core
//!
//! Domain types, traits, and error definitions for the larkrelay chat-bot
//! service. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model provider, tool host, reply channel,
//! idempotency store) is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Per-request fakes in tests instead of process-wide singletons
//! - Swapping implementations via configuration
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod reply;
pub mod store;
pub mod toolhost;

// Re-export key types at crate root for ergonomics
pub use error::{ChannelError, Error, ProviderError, Result, StoreError, ToolHostError};
pub use message::{ChatType, History, InboundMessage, Role, Turn, TurnToolCall};
pub use provider::{FinishReason, Provider, ProviderRequest, ProviderResponse, ToolSchema};
pub use reply::{ReplyChannel, ReplySurface, ReplyTarget};
pub use store::IdempotencyStore;
pub use toolhost::{ToolHost, ToolSession};
