use crate::error::Result;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion call: model, conversation, and whether to stream.
///
/// The model may carry the `zai/` prefix (`zai/glm-4.6`) or be bare (`glm-4.6`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn stream(&self) -> bool {
        self.stream
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// Aggregated (non-streaming) response. Always holds at least one choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Text of the first choice.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One streamed fragment. Fragments without content (role announcements,
/// finish markers, usage trailers) are normal and carry no text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatChunk {
    /// A chunk whose first choice carries `content` (possibly `None`).
    pub fn delta(content: Option<&str>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: Delta {
                    role: None,
                    content: content.map(str::to_string),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Non-empty text of the first choice's delta.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Result of [`crate::Completion::completion`], shaped by the request's stream flag.
pub enum CompletionOutput {
    Response(ChatResponse),
    Stream(ChunkStream),
}

impl fmt::Debug for CompletionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionOutput::Response(r) => f.debug_tuple("Response").field(r).finish(),
            CompletionOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_content_skips_empty_and_missing() {
        assert_eq!(ChatChunk::delta(Some("1")).content(), Some("1"));
        assert_eq!(ChatChunk::delta(Some("")).content(), None);
        assert_eq!(ChatChunk::delta(None).content(), None);
        assert_eq!(ChatChunk::default().content(), None);
    }

    #[test]
    fn request_defaults_to_non_streaming() {
        let req = CompletionRequest::new("zai/glm-4.6", vec![ChatMessage::user("hi")]);
        assert!(!req.stream());
        assert!(req.clone().with_stream(true).stream());
        assert_eq!(req.messages()[0].role, Role::User);
    }
}
