//! Chat-completion model clients for larkrelay.
//!
//! One implementation: the OpenAI-compatible `/chat/completions` endpoint
//! with tool calling, which covers OpenAI, Azure-style proxies, OpenRouter,
//! and local gateways alike.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
