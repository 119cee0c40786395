//! # Storage Queue CLI
//!
//! Command-line front end for the queues used by the storage queue transport.
//!
//! This module provides CLI commands for:
//! - Creating queues
//! - Sending a message through the transport send pipeline
//! - Receiving (and completing or aborting) one message
//! - Purging a queue
//! - Showing the approximate message count

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage_queue_transport::message::{format_time_span, parse_time_span, parse_timestamp};
use storage_queue_transport::{
    headers, AzureStorageAccount, ConfigurationError, DefaultQueueFactory, MessageId, QueueError,
    QueueFactory, QueueName, SerializationError, StorageAccount, StorageQueueTransport,
    TransactionScope, TransportError, TransportMessage, TransportOptions, ValidationError,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Delay between receive attempts while waiting for a message
const POLL_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// CLI Structure
// ============================================================================

/// Storage Queue CLI - administer queues used by the message transport
#[derive(Parser, Debug)]
#[command(name = "storage-queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Administer storage queues used by the message transport")]
pub struct Cli {
    /// Transport options file (TOML, YAML or JSON)
    #[arg(short, long, env = "STORAGE_QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, overridden by RUST_LOG
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Storage account connection string
    #[arg(long, env = "STORAGE_QUEUE_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a queue if it does not exist
    Create {
        /// Queue name
        queue: String,
    },

    /// Send one message
    Send(SendArgs),

    /// Receive one message and complete it
    Receive {
        /// Queue name
        queue: String,

        /// Leave the message on the queue for immediate redelivery
        #[arg(long)]
        abort: bool,

        /// Keep polling for this many seconds while the queue is empty
        #[arg(short, long, default_value = "0")]
        wait: u64,
    },

    /// Delete every message in a queue
    Purge {
        /// Queue name
        queue: String,
    },

    /// Show the approximate number of messages in a queue
    Count {
        /// Queue name
        queue: String,
    },
}

/// Arguments of the send command
#[derive(Args, Debug, Clone, Default)]
pub struct SendArgs {
    /// Destination queue name
    pub queue: String,

    /// Message body text
    pub body: String,

    /// Logical message ID; generated when omitted
    #[arg(long)]
    pub message_id: Option<String>,

    /// Extra header as key=value, may be repeated
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Time to live as [d.]hh:mm:ss
    #[arg(long)]
    pub ttl: Option<String>,

    /// Deliver no earlier than this RFC 3339 timestamp
    #[arg(long)]
    pub defer_until: Option<String>,
}

impl SendArgs {
    /// Build the transport message, rejecting malformed reserved headers up front
    pub fn to_message(&self) -> Result<TransportMessage, CliError> {
        let mut message = TransportMessage::new(
            self.headers.iter().cloned().collect(),
            self.body.clone().into_bytes(),
        );

        let message_id = match &self.message_id {
            Some(id) => id.parse::<MessageId>()?,
            None => MessageId::new(),
        };
        message = message.with_header(headers::MESSAGE_ID, message_id.as_str());

        if let Some(ttl) = &self.ttl {
            let ttl = parse_time_span(headers::TIME_TO_BE_RECEIVED, ttl)?;
            message = message.with_header(headers::TIME_TO_BE_RECEIVED, format_time_span(ttl));
        }

        if let Some(defer_until) = &self.defer_until {
            parse_timestamp(headers::DEFERRED_UNTIL, defer_until)?;
            message = message.with_header(headers::DEFERRED_UNTIL, defer_until.as_str());
        }

        Ok(message)
    }
}

/// Parse a `key=value` header argument
pub fn parse_header(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, header_value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), header_value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", value)),
    }
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Invalid queue name: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid message: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Queue service error: {0}")]
    Queue(#[from] QueueError),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::InvalidArgument { .. } | Self::Validation(_) | Self::Serialization(_) => 2,
            Self::Transport(_) | Self::Queue(_) => 3,
            Self::Logging { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Install the tracing subscriber; logs go to stderr so stdout stays parseable
pub fn initialize_logging(log_level: &str, json_logs: bool) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Run a parsed command line against the configured storage account
pub async fn run_cli(cli: Cli) -> Result<(), CliError> {
    let options = TransportOptions::load(cli.config.as_deref())?;

    let connection_string =
        cli.connection_string
            .as_deref()
            .ok_or_else(|| ConfigurationError::Missing {
                key: "connection_string".to_string(),
            })?;
    let account = AzureStorageAccount::from_connection_string(connection_string)?;

    let cancellation = CancellationToken::new();
    let interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    execute(
        cli.command,
        Arc::new(account),
        options,
        &cancellation,
        &mut stdout,
    )
    .await
}

/// Execute one command, writing its result to `out`
pub async fn execute(
    command: Commands,
    account: Arc<dyn StorageAccount>,
    options: TransportOptions,
    cancellation: &CancellationToken,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Commands::Create { queue } => execute_create_command(account, &options, &queue, out).await,
        Commands::Send(args) => execute_send_command(account, options, &args, out).await,
        Commands::Receive { queue, abort, wait } => {
            let wait = Duration::from_secs(wait);
            execute_receive_command(account, options, &queue, abort, wait, cancellation, out).await
        }
        Commands::Purge { queue } => execute_purge_command(account, options, &queue, out).await,
        Commands::Count { queue } => execute_count_command(account, &options, &queue, out).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute create command; creates the queue even when automatic creation is off
async fn execute_create_command(
    account: Arc<dyn StorageAccount>,
    options: &TransportOptions,
    queue: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let name = QueueName::parse(queue, options.validate_queue_names)?;
    info!(queue_name = %name, "Creating queue");

    DefaultQueueFactory::new(account, true)
        .create_queue_if_missing(&name)
        .await?;

    writeln!(out, "Queue '{}' is ready", name)?;
    Ok(())
}

/// Execute send command
async fn execute_send_command(
    account: Arc<dyn StorageAccount>,
    options: TransportOptions,
    args: &SendArgs,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let message = args.to_message()?;
    let message_id = message.message_id_or_unknown();
    let ttl = message.headers.get(headers::TIME_TO_BE_RECEIVED).cloned();

    let transport = StorageQueueTransport::builder()
        .storage_account(account)
        .options(options)
        .build()?;

    let scope = TransactionScope::new();
    let result = match transport.send(&args.queue, message, &scope) {
        Ok(()) => scope.complete().await,
        Err(e) => Err(e),
    };
    scope.dispose().await;
    result?;

    match ttl {
        Some(ttl) => writeln!(
            out,
            "Sent message '{}' to '{}' (time to be received {})",
            message_id, args.queue, ttl
        )?,
        None => writeln!(out, "Sent message '{}' to '{}'", message_id, args.queue)?,
    }
    Ok(())
}

#[derive(Serialize)]
struct ReceivedMessage<'a> {
    headers: BTreeMap<&'a str, &'a str>,
    body: String,
}

/// Execute receive command
async fn execute_receive_command(
    account: Arc<dyn StorageAccount>,
    options: TransportOptions,
    queue: &str,
    abort: bool,
    wait: Duration,
    cancellation: &CancellationToken,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let transport = StorageQueueTransport::builder()
        .storage_account(account)
        .input_queue(queue)
        .options(options)
        .build()?;
    transport.initialize().await?;

    let scope = TransactionScope::new();
    let result = receive_one(&transport, &scope, abort, wait, cancellation, out).await;
    scope.dispose().await;
    transport.shutdown().await;
    result
}

async fn receive_one(
    transport: &StorageQueueTransport,
    scope: &TransactionScope,
    abort: bool,
    wait: Duration,
    cancellation: &CancellationToken,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let deadline = Instant::now() + wait;

    let message = loop {
        if let Some(message) = transport.receive(scope, cancellation).await? {
            break message;
        }

        let now = Instant::now();
        if cancellation.is_cancelled() || now >= deadline {
            writeln!(out, "No message available")?;
            return Ok(());
        }

        debug!("Queue empty, polling again");
        tokio::select! {
            _ = cancellation.cancelled() => {}
            _ = tokio::time::sleep(POLL_INTERVAL.min(deadline - now)) => {}
        }
    };

    let output = ReceivedMessage {
        headers: message
            .headers
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect(),
        body: String::from_utf8_lossy(&message.body).into_owned(),
    };
    serde_json::to_writer_pretty(&mut *out, &output).map_err(SerializationError::from)?;
    writeln!(out)?;

    if abort {
        scope.abort().await?;
        info!(message_id = %message.message_id_or_unknown(), "Message left on queue");
    } else {
        scope.complete().await?;
        info!(message_id = %message.message_id_or_unknown(), "Message completed");
    }
    Ok(())
}

/// Execute purge command
async fn execute_purge_command(
    account: Arc<dyn StorageAccount>,
    options: TransportOptions,
    queue: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let transport = StorageQueueTransport::builder()
        .storage_account(account)
        .input_queue(queue)
        .options(options)
        .build()?;

    transport.purge_input_queue().await?;

    writeln!(out, "Queue '{}' purged", queue)?;
    Ok(())
}

/// Execute count command
async fn execute_count_command(
    account: Arc<dyn StorageAccount>,
    options: &TransportOptions,
    queue: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let name = QueueName::parse(queue, options.validate_queue_names)?;
    let count = account.queue(&name).approximate_message_count().await?;

    writeln!(out, "{}", count)?;
    Ok(())
}
