use crate::error::{LlmError, Result};
use crate::types::{ChatResponse, ChunkStream, CompletionOutput, CompletionRequest};
use crate::zai::ZaiClient;
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.z.ai/api/paas/v4";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const PROVIDER_PREFIX: &str = "zai/";

/// The completion capability consumed by callers.
#[async_trait]
pub trait Completion: Send + Sync {
    /// One aggregated response.
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatResponse>;

    /// A lazy sequence of delta fragments.
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<ChunkStream>;

    /// Dispatches on [`CompletionRequest::stream`].
    async fn completion(&self, request: &CompletionRequest) -> Result<CompletionOutput> {
        if request.stream() {
            Ok(CompletionOutput::Stream(self.complete_stream(request).await?))
        } else {
            Ok(CompletionOutput::Response(self.complete(request).await?))
        }
    }
}

/// Strips the optional `zai/` prefix. Other `provider/` prefixes are rejected.
pub fn resolve_model(model: &str) -> Result<&str> {
    let model = model.trim();
    let name = match model.strip_prefix(PROVIDER_PREFIX) {
        Some(rest) => rest,
        None => {
            if let Some((provider, _)) = model.split_once('/') {
                return Err(LlmError::InvalidInput(format!(
                    "unsupported provider prefix {provider:?} in model {model:?}; expected \"zai/\" or a bare model name"
                )));
            }
            model
        }
    };
    if name.is_empty() {
        return Err(LlmError::InvalidInput("model is required".to_string()));
    }
    Ok(name)
}

#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    api_base: String,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip(api_key))]
    pub fn with_options(api_key: &str, api_base: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self::from_parts(api_key, api_base, client)
    }

    pub(crate) fn from_parts(api_key: &str, api_base: &str, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.to_string(),
            client,
        }
    }

    fn backend(&self) -> ZaiClient {
        ZaiClient::new(self.client.clone(), &self.api_key, &self.api_base)
    }
}

#[async_trait]
impl Completion for LlmClient {
    #[tracing::instrument(level = "info", skip_all, fields(model = %request.model()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatResponse> {
        let model = resolve_model(request.model())?;
        if request.messages().is_empty() {
            return Err(LlmError::InvalidInput("messages are required".to_string()));
        }
        self.backend().chat(model, request.messages()).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %request.model()))]
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        let model = resolve_model(request.model())?;
        if request.messages().is_empty() {
            return Err(LlmError::InvalidInput("messages are required".to_string()));
        }
        self.backend().chat_stream(model, request.messages()).await
    }
}
