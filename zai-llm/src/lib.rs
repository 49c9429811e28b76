//! Minimal Z.AI completion client.
//!
//! Speaks the OpenAI-compatible `chat/completions` endpoint, both as a single
//! aggregated response and as a server-sent-event stream of deltas. Callers
//! depend on the [`Completion`] trait so the HTTP backend can be swapped out.

mod client;
mod error;
mod types;
mod zai;

pub use client::{Completion, DEFAULT_API_BASE, DEFAULT_TIMEOUT, LlmClient, resolve_model};
pub use error::{LlmError, Result};
pub use types::{
    ChatChunk, ChatMessage, ChatResponse, Choice, ChunkChoice, ChunkStream, CompletionOutput,
    CompletionRequest, Delta, Role, Usage,
};
