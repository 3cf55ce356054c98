use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use signalbus::archive::{self, ArchiveWriter};
use signalbus::assistant::WebhookAssistant;
use signalbus::auth::Allowlist;
use signalbus::groups::{GroupDirectory, GroupResolver};
use signalbus::router::MessageRouter;
use signalbus::signal::{ReceiveLoop, SignalClient};
use signalbus::Config;

#[derive(Parser)]
#[command(name = "signalbus", version, about = "Signal gateway to assistant bridge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Probe gateway and database connectivity, then exit
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG, defaults to INFO.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Doctor => doctor(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    let allowlist = Allowlist::from_csv(&config.authorization_whitelist);
    if allowlist.is_empty() {
        tracing::warn!("authorization allow-list is empty; every sender will be denied");
    } else {
        tracing::info!("authorization allow-list holds {} identities", allowlist.len());
    }

    let timescale = config.timescale.clone();
    let schema = tokio::task::spawn_blocking(move || archive::ensure_schema(&timescale)).await?;
    if let Err(e) = schema {
        tracing::error!("schema initialization failed: {e:#}");
        std::process::exit(1);
    }

    let http = reqwest::Client::new();
    let gateway = Arc::new(SignalClient::new(
        config.gateway_http_base(),
        config.registered_account.clone(),
        http.clone(),
    ));
    let assistant = Arc::new(WebhookAssistant::new(
        config.webhook_url.clone(),
        &config.auth_token,
        http,
    ));
    let resolver = GroupResolver::new(
        gateway.clone() as Arc<dyn GroupDirectory>,
        config.group_cache_size,
    );
    let (archive_handle, writer) = ArchiveWriter::start(config.timescale.clone());

    let router = Arc::new(MessageRouter::new(
        config.registered_account.clone(),
        allowlist,
        resolver,
        archive_handle,
        gateway,
        assistant,
    ));

    let cancel = CancellationToken::new();
    let receive = ReceiveLoop::new(config.receive_url(), router, cancel.clone());
    let receive_task = tokio::spawn(receive.run());

    tracing::info!(
        "bridge started for {} against {}",
        config.registered_account,
        config.signal_endpoint
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    // The receive loop completes its current envelope, then drops the last
    // archive handle, which lets the writer drain and flush.
    let _ = receive_task.await;
    let _ = writer.await;
    tracing::info!("archive writer drained; bye");
    Ok(())
}

async fn doctor(config: Config) -> Result<()> {
    let gateway = SignalClient::new(
        config.gateway_http_base(),
        config.registered_account.clone(),
        reqwest::Client::new(),
    );

    let mut failed = false;
    match gateway.list_groups().await {
        Ok(groups) => println!("gateway: ok ({} groups visible)", groups.len()),
        Err(e) => {
            println!("gateway: failed ({e:#})");
            failed = true;
        }
    }

    let timescale = config.timescale.clone();
    match tokio::task::spawn_blocking(move || archive::ping(&timescale)).await? {
        Ok(()) => println!("database: ok"),
        Err(e) => {
            println!("database: failed ({e:#})");
            failed = true;
        }
    }

    if failed {
        bail!("one or more probes failed");
    }
    Ok(())
}
