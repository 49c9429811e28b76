//! Z.AI GLM usage example: one blocking completion, one streamed completion.
//!
//! Needs `ZAI_API_KEY` in the environment or in a `.env` file.

mod config;
mod demo;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use zai_llm::LlmClient;

#[derive(Debug, Parser)]
#[command(
    name = "zai-example",
    version,
    about = "Call Z.AI GLM models, blocking and streaming"
)]
struct Cli {
    /// Optional TOML file overriding the api base, timeout, models or prompts.
    #[arg(long, env = "ZAI_EXAMPLE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    init_tracing();
    install_panic_hook();
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }

    let cli = Cli::parse();
    let cfg = config::ExampleConfig::load_or_default(cli.config.as_deref());

    let api_key = demo::api_key(|key| std::env::var(key).ok());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    demo::run(
        api_key,
        &cfg,
        |key| LlmClient::with_options(key, &cfg.provider.api_base, cfg.provider.timeout()),
        &mut out,
    )
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

fn init_tracing() {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("warn,zai_example=info,zai_llm=info"),
    };
    let requested = std::env::var("ZAI_EXAMPLE_LOG_FORMAT").ok();
    let log_format = requested
        .as_deref()
        .map_or(Some(LogFormat::Compact), LogFormat::parse);

    // stdout carries the example's own output; logs go to stderr.
    match log_format.unwrap_or(LogFormat::Compact) {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
    }

    if log_format.is_none() {
        tracing::warn!(
            requested = ?requested,
            "unsupported ZAI_EXAMPLE_LOG_FORMAT; expected one of: json, pretty, compact; using compact"
        );
    }
    tracing::debug!(
        log_format = ?log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}
