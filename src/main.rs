//! Channel archiver CLI entry point.

use channel_archiver::api::{self, ApiState};
use channel_archiver::archive::{ArchiveStore, Archiver, QueryLimit};
use channel_archiver::config::Config;
use channel_archiver::db::Db;
use channel_archiver::fetcher::SlackFetcher;
use channel_archiver::trigger::ArchiveTrigger;
use channel_archiver::{export, logging};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "channel-archiver")]
#[command(about = "Incrementally archive channel message history into SQLite")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a channel for archiving (keeps progress if already registered)
    Register {
        channel_id: String,
        /// Display name; looked up upstream when omitted
        #[arg(long)]
        name: Option<String>,
    },
    /// Run one archiving pass over all channels, or a single channel
    Archive {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Print archived messages as JSON lines
    Messages {
        channel_id: String,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Print every message, ignoring --limit
        #[arg(long)]
        all: bool,
    },
    /// Export a channel's archive to a JSON Lines file
    Export { channel_id: String, path: PathBuf },
    /// Serve the query API and archive on a schedule
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // slack-morphism's hyper connector needs a process-wide rustls provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load configuration from environment")?,
    };

    let _log_guard = logging::init_tracing(cli.debug, config.log_dir.as_deref())
        .context("failed to initialize logging")?;

    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

    let db = Db::connect(&config.data_dir)
        .await
        .context("failed to open archive database")?;
    let store = ArchiveStore::new(db.sqlite.clone());

    let result = run(cli.command, &config, store).await;

    db.close().await;
    result
}

async fn run(command: Command, config: &Config, store: ArchiveStore) -> anyhow::Result<()> {
    match command {
        Command::Register { channel_id, name } => {
            let channel = match name {
                Some(name) => store.register_channel(&channel_id, &name).await?,
                None => {
                    build_archiver(config, store)?
                        .register_channel(&channel_id, None)
                        .await?
                }
            };
            println!(
                "registered {} ({}), cursor: {}",
                channel.channel_id,
                channel.display_name,
                channel
                    .cursor
                    .as_ref()
                    .map(|cursor| cursor.as_str())
                    .unwrap_or("none")
            );
        }
        Command::Archive { channel } => {
            let archiver = build_archiver(config, store)?;
            let cancel = cancel_on_ctrl_c();
            match channel {
                Some(channel_id) => {
                    let outcome = archiver.archive_channel(&channel_id, &cancel).await?;
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                }
                None => {
                    let summary = archiver.archive_all(&cancel).await?;
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
            }
        }
        Command::Messages {
            channel_id,
            limit,
            offset,
            all,
        } => {
            if store.get_channel(&channel_id).await?.is_none() {
                anyhow::bail!("channel {channel_id} is not registered");
            }
            let limit = if all {
                QueryLimit::Unbounded
            } else {
                QueryLimit::Bounded(limit)
            };
            let messages = store.query_messages(&channel_id, limit, offset).await?;
            let mut stdout = std::io::stdout().lock();
            for message in &messages {
                serde_json::to_writer(&mut stdout, message)?;
                writeln!(stdout)?;
            }
        }
        Command::Export { channel_id, path } => {
            let count = export::export_channel(&store, &channel_id, &path).await?;
            println!("exported {count} messages to {}", path.display());
        }
        Command::Serve => serve(config, store).await?,
    }

    Ok(())
}

fn build_archiver(config: &Config, store: ArchiveStore) -> anyhow::Result<Arc<Archiver>> {
    let fetcher = SlackFetcher::new(config.slack_bot_token()?)?;
    Ok(Arc::new(Archiver::new(
        store,
        Arc::new(fetcher),
        config.archive.clone(),
    )))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after the current page");
            token.cancel();
        }
    });
    cancel
}

async fn serve(config: &Config, store: ArchiveStore) -> anyhow::Result<()> {
    let archiver = build_archiver(config, store)?;

    for channel_id in &config.channels {
        match archiver.register_channel(channel_id, None).await {
            Ok(channel) => {
                tracing::info!(channel_id, name = %channel.display_name, "configured channel ready");
            }
            Err(error) => {
                tracing::warn!(channel_id, %error, "failed to register configured channel");
            }
        }
    }

    let shutdown = CancellationToken::new();
    let state = Arc::new(ApiState::new(
        archiver.clone(),
        config.api.export_dir.clone(),
        shutdown.clone(),
    ));
    let server = api::start_http_server(config.api.bind, state, shutdown.clone()).await?;
    let trigger = ArchiveTrigger::new(archiver, config.trigger.clone()).spawn(shutdown.clone());

    tracing::info!("channel archiver started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    shutdown.cancel();

    let (server_exit, trigger_exit) = tokio::join!(server, trigger);
    task_exited_cleanly("http server", server_exit);
    task_exited_cleanly("archive trigger", trigger_exit);
    tracing::info!("channel archiver stopped");
    Ok(())
}

/// Log a background task that panicked or was aborted instead of returning.
fn task_exited_cleanly(task: &str, exit: Result<(), tokio::task::JoinError>) -> bool {
    match exit {
        Ok(()) => true,
        Err(error) => {
            tracing::error!(task, %error, panicked = error.is_panic(), "background task failed");
            false
        }
    }
}
