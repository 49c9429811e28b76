use crate::error::{LlmError, Result};
use crate::types::{
    ChatChunk, ChatMessage, ChatResponse, Choice, ChunkChoice, ChunkStream, Delta, Role, Usage,
};
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct ZaiClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
}

impl ZaiClient {
    pub fn new(http: reqwest::Client, api_key: &str, api_base: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            url: format!("{}/chat/completions", api_base.trim_end_matches('/')),
        }
    }

    #[tracing::instrument(level = "info", skip(self, messages), fields(url = %self.url))]
    pub async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let req = ZaiChatRequest::new(model, messages, false);

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Status {
                op: "chat",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ZaiChatResponse = serde_json::from_str(&body)?;
        let out = ChatResponse::try_from(parsed)?;
        tracing::debug!(
            choices = out.choices.len(),
            usage = ?out.usage,
            "zai chat completed"
        );
        Ok(out)
    }

    #[tracing::instrument(level = "info", skip(self, messages), fields(url = %self.url))]
    pub async fn chat_stream(&self, model: &str, messages: &[ChatMessage]) -> Result<ChunkStream> {
        let req = ZaiChatRequest::new(model, messages, true);

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                op: "stream",
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::pin(decode_chunks(response.bytes_stream())))
    }
}

#[derive(Debug, Serialize)]
struct ZaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ZaiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ZaiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> ZaiChatRequest<'a> {
    fn new(model: &'a str, messages: &'a [ChatMessage], stream: bool) -> Self {
        Self {
            model,
            messages: messages
                .iter()
                .map(|m| ZaiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: stream.then_some(true),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZaiChatResponse {
    #[serde(default)]
    choices: Vec<ZaiChoice>,
    #[serde(default)]
    usage: Option<ZaiUsage>,
}

#[derive(Debug, Deserialize)]
struct ZaiChoice {
    message: ZaiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZaiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZaiUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

impl From<ZaiUsage> for Usage {
    fn from(u: ZaiUsage) -> Self {
        Usage {
            prompt_tokens: saturating_u32(u.prompt_tokens),
            completion_tokens: saturating_u32(u.completion_tokens),
        }
    }
}

fn saturating_u32(v: Option<u64>) -> u32 {
    v.map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

impl TryFrom<ZaiChatResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: ZaiChatResponse) -> Result<Self> {
        if v.choices.is_empty() {
            return Err(LlmError::ResponseFormat(
                "zai response missing choices".to_string(),
            ));
        }

        let choices = v
            .choices
            .into_iter()
            .map(|c| Choice {
                message: ChatMessage {
                    role: Role::Assistant,
                    content: c.message.content.unwrap_or_default(),
                },
                finish_reason: c.finish_reason,
            })
            .collect();

        Ok(ChatResponse {
            choices,
            usage: v.usage.map(Usage::from),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ZaiStreamChunk {
    #[serde(default)]
    choices: Vec<ZaiStreamChoice>,
    #[serde(default)]
    usage: Option<ZaiUsage>,
}

#[derive(Debug, Deserialize)]
struct ZaiStreamChoice {
    #[serde(default)]
    delta: ZaiStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ZaiStreamDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl From<ZaiStreamChunk> for ChatChunk {
    fn from(v: ZaiStreamChunk) -> Self {
        ChatChunk {
            choices: v
                .choices
                .into_iter()
                .map(|c| ChunkChoice {
                    delta: Delta {
                        role: c.delta.role.as_deref().and_then(parse_role),
                        content: c.delta.content,
                    },
                    finish_reason: c.finish_reason,
                })
                .collect(),
            usage: v.usage.map(Usage::from),
        }
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}

/// Turns an SSE byte stream into parsed chunks, ending at `data: [DONE]`.
fn decode_chunks<S>(bytes_stream: S) -> impl Stream<Item = Result<ChatChunk>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let sse = Box::pin(decode_sse(bytes_stream));
    futures_util::stream::unfold(sse, |mut sse| async move {
        loop {
            match sse.as_mut().next().await? {
                Ok(SseEvent::Data(data)) => {
                    if data.trim() == "[DONE]" {
                        return None;
                    }
                    let item = serde_json::from_str::<ZaiStreamChunk>(&data)
                        .map(ChatChunk::from)
                        .map_err(|e| {
                            LlmError::StreamParse(format!("zai chunk json error={e} data={data}"))
                        });
                    return Some((item, sse));
                }
                Ok(SseEvent::Other) => continue,
                Err(e) => return Some((Err(e), sse)),
            }
        }
    })
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Data(String),
    Other,
}

fn decode_sse<S>(bytes_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    // Raw bytes are buffered so multibyte characters split across chunks survive.
    futures_util::stream::unfold(
        (bytes_stream, Vec::<u8>::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(idx) = buffer.windows(2).position(|w| w == b"\n\n") {
                    let raw: Vec<u8> = buffer.drain(..idx + 2).take(idx).collect();
                    return Some((parse_event(&raw), (stream, buffer)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
                        continue;
                    }
                    Some(Err(e)) => {
                        return Some((Err(LlmError::Http(e.to_string())), (stream, buffer)));
                    }
                    None => {
                        // Servers may omit the blank line after the last event.
                        let rest = std::mem::take(&mut buffer);
                        return match parse_event(&rest) {
                            Ok(SseEvent::Other) => None,
                            event => Some((event, (stream, buffer))),
                        };
                    }
                }
            }
        },
    )
}

fn parse_event(raw: &[u8]) -> Result<SseEvent> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| LlmError::StreamParse(format!("zai event is not utf-8: {e}")))?;
    let data_lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data_lines.is_empty() {
        return Ok(SseEvent::Other);
    }
    Ok(SseEvent::Data(data_lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        parts: &[&str],
    ) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static
    {
        let owned: Vec<std::result::Result<Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures_util::stream::iter(owned)
    }

    fn raw_byte_stream(
        parts: Vec<Vec<u8>>,
    ) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static
    {
        let owned: Vec<std::result::Result<Bytes, reqwest::Error>> =
            parts.into_iter().map(|p| Ok(Bytes::from(p))).collect();
        futures_util::stream::iter(owned)
    }

    #[test]
    fn request_omits_stream_flag_unless_streaming() {
        let messages = vec![ChatMessage::user("Count from 1 to 5.")];

        let plain = serde_json::to_value(ZaiChatRequest::new("glm-4.6", &messages, false))
            .expect("serialize");
        assert!(plain.get("stream").is_none());
        assert_eq!(plain["model"], "glm-4.6");
        assert_eq!(plain["messages"][0]["role"], "user");
        assert_eq!(plain["messages"][0]["content"], "Count from 1 to 5.");

        let streamed = serde_json::to_value(ZaiChatRequest::new("glm-4.5-flash", &messages, true))
            .expect("serialize");
        assert_eq!(streamed["stream"], true);
    }

    #[test]
    fn response_conversion_takes_choices_and_usage() {
        let raw = r#"{
            "id": "abc",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ZaiChatResponse = serde_json::from_str(raw).expect("parse");
        let resp = ChatResponse::try_from(parsed).expect("convert");
        assert_eq!(resp.content(), Some("Hi there"));
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(
            resp.usage,
            Some(Usage {
                prompt_tokens: 12,
                completion_tokens: 3
            })
        );
    }

    #[test]
    fn response_without_choices_is_a_format_error() {
        let parsed: ZaiChatResponse = serde_json::from_str(r#"{"choices": []}"#).expect("parse");
        let err = ChatResponse::try_from(parsed).expect_err("must fail");
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }

    #[tokio::test]
    async fn sse_events_split_across_chunks_are_reassembled() {
        let stream = byte_stream(&[
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"con",
            "tent\":\"1\"}}]}\r\n\r\ndata: {\"choices\":[{\"delta\":{}}]}\n\n",
        ]);
        let events: Vec<SseEvent> = decode_sse(stream)
            .map(|e| e.expect("event"))
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], SseEvent::Other);
        assert_eq!(
            events[1],
            SseEvent::Data(r#"{"choices":[{"delta":{"role":"assistant","content":"1"}}]}"#.to_string())
        );
    }

    #[tokio::test]
    async fn chunks_stop_at_done_and_keep_empty_deltas() {
        let stream = byte_stream(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"1, 2\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":4}}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        ]);
        let chunks: Vec<ChatChunk> = decode_chunks(stream)
            .map(|c| c.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].choices[0].delta.role, Some(Role::Assistant));
        assert_eq!(chunks[0].content(), None);
        assert_eq!(chunks[1].content(), Some("1, 2"));
        assert_eq!(chunks[2].choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(chunks[2].usage.map(|u| u.completion_tokens), Some(4));
    }

    #[tokio::test]
    async fn trailing_event_without_blank_line_is_delivered() {
        let stream = byte_stream(&["data: {\"choices\":[{\"delta\":{\"content\":\"5\"}}]}"]);
        let chunks: Vec<ChatChunk> = decode_chunks(stream)
            .map(|c| c.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), Some("5"));
    }

    #[tokio::test]
    async fn malformed_chunk_surfaces_stream_parse_error() {
        let stream = byte_stream(&["data: {not json}\n\n"]);
        let items: Vec<Result<ChatChunk>> = decode_chunks(stream).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LlmError::StreamParse(_))));
    }

    #[tokio::test]
    async fn multibyte_text_split_across_chunks_is_preserved() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\n".as_bytes();
        let first_char = event
            .windows("你".len())
            .position(|w| w == "你".as_bytes())
            .expect("char present");
        let split = first_char + 1;
        let stream = raw_byte_stream(vec![event[..split].to_vec(), event[split..].to_vec()]);

        let chunks: Vec<ChatChunk> = decode_chunks(stream)
            .map(|c| c.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), Some("你好"));
    }

    #[tokio::test]
    async fn invalid_utf8_event_is_a_stream_parse_error() {
        let mut event = b"data: {\"choices\":[]}".to_vec();
        event.push(0xff);
        event.extend_from_slice(b"\n\n");
        let items: Vec<Result<SseEvent>> = decode_sse(raw_byte_stream(vec![event])).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LlmError::StreamParse(_))));
    }

    #[test]
    fn oversized_token_counts_saturate() {
        let raw = r#"{"choices":[{"message":{"content":"x"}}],"usage":{"prompt_tokens":5000000000,"completion_tokens":7}}"#;
        let parsed: ZaiChatResponse = serde_json::from_str(raw).expect("parse");
        let usage = ChatResponse::try_from(parsed)
            .expect("convert")
            .usage
            .expect("usage");
        assert_eq!(usage.prompt_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 7);
    }
}
