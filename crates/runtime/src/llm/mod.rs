//! LLM chat-completion client
//!
//! A single `ChatClient` trait abstracts over the cloud providers; all three
//! roles (generator, reflector, curator) are prompt contracts against it.

pub mod client;
pub mod retry;

pub use client::{
    ChatClient, ChatRequest, ChatResponse, HttpChatClient, LlmError, LlmProvider, ResponseFormat,
    Usage,
};
pub use retry::{complete_with_retries, RetryConfig};
