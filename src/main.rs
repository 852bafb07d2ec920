//! Tongues CLI - terminal front end for a multilingual chat relay.
//!
//! This is the main binary entry point. See the `tongues` library for the
//! core functionality.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use tongues::metrics::MetricsClient;
use tongues::session::ReconnectMode;
use tongues::{
    ChatSession, Config, ConnectionManager, Language, Message, SendOutcome, SessionError,
    SessionIdentity,
};

/// Global allocator.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const HELP: &str = "\
Commands:
  /lang <tag>   switch language (e.g. /lang spa_Latn)
  /langs        list languages
  /status       show connection status
  /metrics      fetch relay metrics
  /reconnect    reconnect to the relay
  /quit         leave";

#[derive(Parser)]
#[command(name = "tongues")]
#[command(version)]
#[command(about = "Chat through a real-time translation relay")]
struct Cli {
    /// Relay endpoint (ws://, wss://, http:// or https://).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Language tag to receive messages in.
    #[arg(long, global = true)]
    lang: Option<Language>,

    /// Keep the session identity in this file across runs.
    #[arg(long, global = true)]
    identity_file: Option<PathBuf>,

    /// Reconnect policy: manual or backoff.
    #[arg(long, global = true)]
    reconnect: Option<ReconnectMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the chat (default).
    Chat,
    /// Print the relay's performance report.
    Metrics,
    /// Print the relay's health summary.
    Health,
    /// Print the effective configuration.
    Config {
        /// Write the effective configuration to the config file.
        #[arg(long)]
        save: bool,
    },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.server_url.clone_from(server);
        }
        if let Some(lang) = self.lang {
            config.language = lang;
        }
        if let Some(path) = &self.identity_file {
            config.identity_file = Some(path.clone());
        }
        if let Some(mode) = self.reconnect {
            config.reconnect = mode;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let mut config = Config::load()?;
    cli.apply(&mut config);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(config).await,
        Commands::Metrics => print_metrics(&config.server_url).await,
        Commands::Health => print_health(&config.server_url).await,
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = config.save()?;
                println!("Saved to {}", path.display());
            }
            Ok(())
        }
    }
}

/// Logs go to stderr, or to `TONGUES_LOG_FILE` so they don't interleave
/// with the chat.
fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("TONGUES_LOG_FILE") {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

async fn run_chat(config: Config) -> Result<()> {
    let store = config.identity_store();
    let identity = SessionIdentity::load_or_create(&*store)?;
    log::info!("[Identity] Using {}", identity);

    let manager = ConnectionManager::new();
    let session = Arc::new(ChatSession::attach(
        manager.clone(),
        config.session_config(),
        identity.clone(),
        config.language,
    )?);

    println!(
        "tongues: {} as {} ({}). Type /help for commands.",
        config.server_url,
        identity,
        config.language.display_name()
    );

    let render = tokio::spawn(render_loop(Arc::clone(&session), session.watch_updates()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        if !handle_line(&session, &config, line.trim_end()).await {
            break;
        }
    }

    render.abort();
    manager.disconnect();
    Ok(())
}

/// Returns `false` when the user asked to leave.
async fn handle_line(session: &ChatSession, config: &Config, line: &str) -> bool {
    let (command, arg) = line
        .split_once(' ')
        .map_or((line, ""), |(command, arg)| (command, arg.trim()));

    match command {
        "/quit" | "/exit" => return false,
        "/help" => println!("{HELP}"),
        "/langs" => {
            for lang in Language::ALL {
                println!("  {:<9} {}", lang.tag(), lang.display_name());
            }
        }
        "/lang" => match arg.parse::<Language>() {
            Ok(lang) => {
                if let Err(e) = session.set_language(lang) {
                    println!("! {e}");
                } else {
                    println!("* Receiving messages in {}", lang.display_name());
                }
            }
            Err(e) => println!("! {e}"),
        },
        "/status" => {
            let snapshot = session.snapshot();
            println!(
                "* {} as {} in {}, {} messages",
                if snapshot.connected { "Connected" } else { "Disconnected" },
                snapshot.identity,
                snapshot.language.display_name(),
                snapshot.messages.len()
            );
        }
        "/reconnect" => session.reconnect(),
        "/metrics" => {
            if let Err(e) = print_metrics(&config.server_url).await {
                println!("! {e:#}");
            }
        }
        _ => match session.send_message(line) {
            Ok(SendOutcome::Sent(_) | SendOutcome::Skipped) => {}
            Err(SessionError::Unavailable) => println!("! Not connected, message not sent"),
            Err(e) => println!("! {e}"),
        },
    }
    true
}

/// Print history, status and connection changes as they happen.
async fn render_loop(session: Arc<ChatSession>, mut updates: watch::Receiver<u64>) {
    let mut printed = 0;
    let mut connected = None;
    let mut status = None;

    loop {
        let snapshot = session.snapshot();

        if connected != Some(snapshot.connected) {
            println!(
                "* {}",
                if snapshot.connected { "Connected" } else { "Disconnected (/reconnect to retry)" }
            );
            connected = Some(snapshot.connected);
        }

        for message in snapshot.messages.iter().skip(printed) {
            if !message.is_local() {
                println!("{}", format_message(message));
            }
        }
        printed = snapshot.messages.len();

        if snapshot.status != status {
            if let Some(current) = &snapshot.status {
                println!("… {}", current.content);
            }
            status = snapshot.status;
        }

        if updates.changed().await.is_err() {
            return;
        }
    }
}

fn format_message(message: &Message) -> String {
    let mut line = format!("[{}] {}", message.sender.as_str(), message.content);
    if let Some(original) = message.provenance() {
        line.push_str(&format!("  (original: {original})"));
    }
    if let Some(latency) = message.latency_ms {
        line.push_str(&format!("  {latency:.0}ms"));
    }
    line
}

async fn print_metrics(server_url: &str) -> Result<()> {
    let metrics = MetricsClient::new(server_url)?.fetch_metrics().await?;
    println!(
        "Translations: {}  Active connections: {}",
        metrics.total_translations, metrics.active_connections
    );
    match metrics.report() {
        Some(report) => {
            if let Some(avg) = report.avg_latency_ms {
                println!("Average latency: {avg:.2}ms");
            }
            if let Some(p95) = report.p95_latency_ms {
                println!("P95 latency: {p95:.2}ms");
            }
            if let Some(status) = &report.status {
                println!("Status: {status}");
            }
        }
        None => println!("{}", metrics.performance_report.trim()),
    }
    Ok(())
}

async fn print_health(server_url: &str) -> Result<()> {
    let health = MetricsClient::new(server_url)?.fetch_health().await?;
    println!(
        "{}  avg latency {:.2}ms  {} active connections",
        health.status, health.avg_latency_ms, health.active_connections
    );
    Ok(())
}
