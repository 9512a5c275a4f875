/// Version injected at compile time via DATABRICKS_EXTENSION_VERSION env var
/// (set by CI/CD), or "dev" for local builds.
pub const VERSION: &str = match option_env!("DATABRICKS_EXTENSION_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use databricks_extension::config::Settings;
use databricks_extension::databricks::auth::AzureTokenProvider;
use databricks_extension::databricks::factory::DatabricksClientFactory;
use databricks_extension::handlers::{HandlerContext, HandlerRegistry, ResourceRequest};
use databricks_extension::{resource, Error};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Bicep extension for Azure Databricks
#[derive(Parser, Debug)]
#[command(name = "databricks-extension", version = VERSION, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log file (defaults to the user config directory)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// HTTP timeout in seconds, overriding the settings file
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Reconcile one resource request read from stdin (default)
    Handle,
    /// Print the resource type registry
    Types,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

/// Overrides `--log-level` with a full filter directive
const LOG_FILTER_ENV: &str = "DATABRICKS_EXTENSION_LOG";

/// Filter directive for a level; HTTP internals are capped at warn
fn log_directive(level: Level) -> String {
    format!(
        "{},hyper=warn,reqwest=warn,rustls=warn",
        level.as_str().to_ascii_lowercase()
    )
}

/// Log to a file; stdout carries the protocol
fn setup_logging(
    level: LogLevel,
    log_file: Option<PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = log_file.unwrap_or_else(get_log_path);
    if let Some(dir) = log_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_new(log_directive(tracing_level)))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(version = VERSION, log_file = ?log_path, "databricks-extension starting");
    Ok(Some(guard))
}

/// `<config dir>/databricks-extension/extension.log`, else next to the home dir
fn get_log_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("databricks-extension"))
        .or_else(|| dirs::home_dir().map(|home| home.join(".databricks-extension")))
        .unwrap_or_default()
        .join("extension.log")
}

/// Error envelope written to stdout when a request fails
fn error_body(err: &Error) -> Value {
    json!({
        "error": {
            "code": err.code(),
            "message": err.to_string(),
            "hint": err.hint(),
        }
    })
}

/// Cancel the shared token on Ctrl-C
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling the in-flight request");
            cancel.cancel();
        }
    });
}

async fn handle(settings: Settings) -> Result<ExitCode> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read the request from stdin")?;

    let tokens = Arc::new(AzureTokenProvider::new(settings.token_env_var.clone()));
    let factory = Arc::new(DatabricksClientFactory::new(tokens, settings.http_timeout()));
    let registry = HandlerRegistry::standard(HandlerContext::new(factory), settings.cluster_poll());

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result = match serde_json::from_str::<ResourceRequest<Value>>(&input) {
        Ok(request) => registry.dispatch(request, &cancel).await,
        Err(e) => Err(Error::from(e)),
    };

    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        },
        Err(err) => {
            tracing::error!("Request failed: {}", err);
            println!("{}", serde_json::to_string_pretty(&error_body(&err))?);
            Ok(ExitCode::FAILURE)
        },
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.clone())?;

    let mut settings = Settings::load();
    if let Some(timeout) = args.timeout {
        settings.http_timeout_secs = timeout;
    }
    tracing::debug!(
        "HTTP timeout {:?}, cluster poll budget {:?}",
        Duration::from_secs(settings.http_timeout_secs),
        settings.cluster_poll().budget()
    );

    match args.command.unwrap_or(Command::Handle) {
        Command::Handle => handle(settings).await,
        Command::Types => {
            println!("{}", serde_json::to_string_pretty(resource::get_registry())?);
            Ok(ExitCode::SUCCESS)
        },
    }
}
