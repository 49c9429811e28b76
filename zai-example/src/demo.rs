//! The example routine: credential guard, one blocking call, one streaming call.
//!
//! Call failures are printed and swallowed; only writes to `out` can fail the routine.

use crate::config::{ExampleConfig, SingleCallConfig, StreamCallConfig};
use futures_util::StreamExt;
use std::io::{self, Write};
use zai_llm::{ChatMessage, Completion, CompletionRequest, LlmError, resolve_model};

pub const API_KEY_ENV: &str = "ZAI_API_KEY";
pub const API_KEY_HELP_URL: &str = "https://z.ai/model-api";

const SEPARATOR_WIDTH: usize = 50;

/// Returns the credential when present and non-blank.
pub fn api_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty())
}

/// Runs both calls. `connect` is only invoked once the credential check passes.
pub async fn run<C, F, W>(
    api_key: Option<String>,
    cfg: &ExampleConfig,
    connect: F,
    out: &mut W,
) -> io::Result<()>
where
    C: Completion,
    F: FnOnce(&str) -> C,
    W: Write,
{
    let Some(api_key) = api_key.filter(|v| !v.trim().is_empty()) else {
        tracing::warn!(env = API_KEY_ENV, "credential missing; skipping calls");
        writeln!(out, "Error: {API_KEY_ENV} environment variable not set")?;
        writeln!(out, "Get your API key from: {API_KEY_HELP_URL}")?;
        return Ok(());
    };

    let completion = connect(&api_key);
    single_shot(&completion, &cfg.single, out).await?;
    streaming(&completion, &cfg.stream, out).await?;
    Ok(())
}

#[tracing::instrument(level = "info", skip_all, fields(model = %call.model))]
async fn single_shot<C, W>(completion: &C, call: &SingleCallConfig, out: &mut W) -> io::Result<()>
where
    C: Completion,
    W: Write,
{
    writeln!(
        out,
        "Testing Z.AI {} model (via direct SDK)...\n",
        bare_model(&call.model).to_ascii_uppercase()
    )?;

    let request = CompletionRequest::new(&call.model, vec![ChatMessage::user(&call.prompt)]);
    let result = completion.complete(&request).await.and_then(|resp| {
        resp.content().map(str::to_string).ok_or_else(|| {
            LlmError::ResponseFormat("response has no choices".to_string())
        })
    });

    match result {
        Ok(content) => {
            writeln!(out, "Response:")?;
            writeln!(out, "{content}")?;
            writeln!(out, "\n{}\n", "=".repeat(SEPARATOR_WIDTH))?;
        }
        Err(e) => {
            tracing::warn!(error = %e, "single-shot completion failed");
            writeln!(out, "Error: {e}")?;
            writeln!(
                out,
                "\nNote: For direct SDK usage, ensure you have the latest zai-llm version."
            )?;
            writeln!(
                out,
                "For proxy usage, use the start_proxy.sh or start_proxy.bat scripts."
            )?;
        }
    }
    Ok(())
}

#[tracing::instrument(level = "info", skip_all, fields(model = %call.model))]
async fn streaming<C, W>(completion: &C, call: &StreamCallConfig, out: &mut W) -> io::Result<()>
where
    C: Completion,
    W: Write,
{
    let model = bare_model(&call.model);
    let tier = if model.ends_with("-flash") {
        " (FREE tier)"
    } else {
        ""
    };
    writeln!(out, "Testing streaming response with {model}{tier}...\n")?;

    let request = CompletionRequest::new(&call.model, vec![ChatMessage::user(&call.prompt)])
        .with_stream(true);
    let mut stream = match completion.complete_stream(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "streaming completion failed to start");
            writeln!(out, "Error: {e}")?;
            return Ok(());
        }
    };

    writeln!(out, "Streaming response:")?;
    let mut wrote_text = false;
    let mut fragments = 0usize;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                fragments += 1;
                if let Some(text) = chunk.content() {
                    write!(out, "{text}")?;
                    out.flush()?;
                    wrote_text = true;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, fragments, "streaming completion failed mid-stream");
                if wrote_text {
                    writeln!(out)?;
                }
                writeln!(out, "Error: {e}")?;
                return Ok(());
            }
        }
    }
    writeln!(out)?;
    out.flush()?;
    tracing::debug!(fragments, "stream finished");
    Ok(())
}

fn bare_model(model: &str) -> &str {
    resolve_model(model).unwrap_or(model)
}
