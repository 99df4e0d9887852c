//! whatsapp-mcp CLI entry point.
//!
//! Provides `serve`, `tools` and `call` subcommands for running the stdio MCP
//! server, listing the tool definitions, or invoking a single tool.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use whatsapp_mcp::config::{Config, LoadedConfig};
use whatsapp_mcp::mcp::McpServer;
use whatsapp_mcp::tools::adapter::WhatsAppAdapter;
use whatsapp_mcp::tools::dispatch::DispatchPolicy;
use whatsapp_mcp::tools::media::MediaStore;
use whatsapp_mcp::tools::{ToolCall, ToolDispatcher, ToolRegistry};
use whatsapp_mcp::whatsapp::client::BridgeClient;
use whatsapp_mcp::whatsapp::transcode::{DisabledTranscoder, FfmpegTranscoder, Transcoder};
use whatsapp_mcp::whatsapp::WhatsAppApi;

/// WhatsApp tools for AI assistants, served over MCP stdio.
#[derive(Parser)]
#[command(name = "whatsapp-mcp", version, about)]
struct Cli {
    /// Config file (default: $WHATSAPP_MCP_CONFIG or ./whatsapp-mcp.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the MCP server on stdin/stdout (the default).
    Serve,
    /// Print the tool definitions as JSON.
    Tools,
    /// Invoke one tool and print its MCP result.
    Call {
        /// Tool name, e.g. `list_chats`.
        tool: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let loaded = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => handle_serve(loaded).await,
        Command::Tools => handle_tools(),
        Command::Call { tool, args } => handle_call(loaded, &tool, &args).await,
    }
}

/// Run the stdio server until the client disconnects.
async fn handle_serve(loaded: LoadedConfig) -> anyhow::Result<()> {
    let config = &loaded.config;
    let _logging_guard = match &config.logging.log_dir {
        Some(dir) => Some(whatsapp_mcp::logging::init_production(dir, &config.logging.level)?),
        None => {
            whatsapp_mcp::logging::init_cli(&config.logging.level);
            None
        }
    };
    loaded.log_summary();

    let client = Arc::new(BridgeClient::new(&config.bridge.base_url, config.bridge.timeouts()));
    if !client.is_reachable().await {
        warn!(base_url = client.base_url(), "WhatsApp bridge is not reachable yet");
    }

    let dispatcher = build_dispatcher(config, client);
    info!(
        bridge = %config.bridge.base_url,
        user_id = %config.bridge.user_id,
        download_dir = %config.media.download_dir.display(),
        "whatsapp-mcp started"
    );

    McpServer::new(Arc::new(dispatcher))
        .run_stdio()
        .await
        .context("MCP server failed")?;

    info!("client disconnected, shutting down");
    Ok(())
}

/// Print every tool definition.
fn handle_tools() -> anyhow::Result<()> {
    let definitions = ToolRegistry::builtin().definitions();
    println!("{}", serde_json::to_string_pretty(&definitions)?);
    Ok(())
}

/// Run a single tool call against the configured bridge.
async fn handle_call(loaded: LoadedConfig, tool: &str, args: &str) -> anyhow::Result<()> {
    let config = &loaded.config;
    whatsapp_mcp::logging::init_cli(&config.logging.level);
    loaded.log_summary();

    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be valid JSON")?;

    let client = Arc::new(BridgeClient::new(&config.bridge.base_url, config.bridge.timeouts()));
    let dispatcher = build_dispatcher(config, client);

    let result = dispatcher.handle(&ToolCall::new(tool, arguments)).await;
    println!("{}", serde_json::to_string_pretty(&result.to_mcp())?);

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn build_dispatcher(config: &Config, client: Arc<dyn WhatsAppApi>) -> ToolDispatcher {
    let transcoder: Arc<dyn Transcoder> = if config.media.ffmpeg_path.trim().is_empty() {
        info!("ffmpeg disabled, voice notes must already be .ogg");
        Arc::new(DisabledTranscoder)
    } else {
        Arc::new(FfmpegTranscoder::new(&config.media.ffmpeg_path))
    };

    let adapter = WhatsAppAdapter::new(
        client,
        transcoder,
        MediaStore::new(config.media.download_dir.clone()),
        config.media.max_upload_bytes,
    )
    .with_default_user(config.bridge.user_id.clone());

    let policy = DispatchPolicy {
        call_timeout: Duration::from_secs(config.dispatch.call_timeout_secs),
        read_retry_backoff: Duration::from_millis(config.dispatch.read_retry_backoff_ms),
    };

    ToolDispatcher::new(Arc::new(ToolRegistry::builtin()), adapter, policy)
}
