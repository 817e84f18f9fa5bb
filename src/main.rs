//! The `transferscan` service binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use transferscan::backends::{BlobDownloader, ClamAvConfig, ClamAvScanner};
use transferscan::config::{ConfigSource, EnvSource, LayeredSource, SettingsHandle, TomlFileSource};
use transferscan::http::{router, serve, shutdown_signal, AppState};
use transferscan::notify::{EventGridPublisher, NotificationPublisher};
use transferscan::{ScanOrchestrator, Scanner, WorkerPool};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "transferscan", version, about = "Scan transferred files and publish the verdict")]
struct Cli {
    /// TOML configuration file; environment variables take precedence.
    #[arg(long, global = true, env = "TRANSFERSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Validate the configuration and ping the scanner, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    load_env_file(cli.env_file.as_deref())?;
    init_tracing(cli.log_json);

    let source = config_source(cli.config.as_deref())?;
    let settings = Arc::new(SettingsHandle::load(source).context("invalid configuration")?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(settings).await,
        Command::CheckConfig => check_config(settings).await,
    }
}

fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load env file {}", path.display()))?;
        }
        None => {
            // A missing ./.env is fine
            let _ = dotenvy::dotenv();
        }
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn config_source(path: Option<&Path>) -> Result<Arc<dyn ConfigSource>> {
    let mut layered = LayeredSource::new().with_layer(EnvSource::new());
    if let Some(path) = path {
        let file = TomlFileSource::open(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?;
        layered = layered.with_layer(file);
    }
    Ok(Arc::new(layered))
}

async fn run_server(settings: Arc<SettingsHandle>) -> Result<()> {
    let snapshot = settings.snapshot().await;

    let scanner = ClamAvScanner::new(ClamAvConfig::from_settings(&snapshot.clamav))
        .context("invalid scanner configuration")?;
    if let Err(e) = scanner.health_check().await {
        tracing::warn!(error = %e, "Scanner is not reachable yet; scans will fail until it is");
    }

    let downloader = BlobDownloader::new(Arc::clone(&settings), DOWNLOAD_TIMEOUT)
        .context("failed to create blob downloader")?;
    let transport =
        EventGridPublisher::new(PUBLISH_TIMEOUT).context("failed to create event publisher")?;
    let publisher = NotificationPublisher::new(Arc::new(transport), Arc::clone(&settings));

    let orchestrator = ScanOrchestrator::builder()
        .downloader(downloader)
        .scanner(scanner)
        .publisher(publisher.clone())
        .settings(Arc::clone(&settings))
        .build()
        .context("failed to assemble the scan pipeline")?;

    let pool = Arc::new(WorkerPool::start(
        Arc::new(orchestrator),
        snapshot.max_concurrent_scans,
        snapshot.queue_capacity,
    ));
    let refresh = snapshot
        .refresh_interval
        .map(|period| settings.spawn_refresh(period));

    tracing::info!(
        http_port = snapshot.http_port,
        https_port = snapshot.tls.as_ref().map(|_| snapshot.https_port),
        workers = snapshot.max_concurrent_scans,
        queue_capacity = snapshot.queue_capacity,
        "Starting transferscan"
    );

    let app = router(AppState::new(Arc::clone(&pool), publisher));
    serve(app, &snapshot, pool, shutdown_signal())
        .await
        .context("server failed")?;

    if let Some(task) = refresh {
        task.abort();
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn check_config(settings: Arc<SettingsHandle>) -> Result<()> {
    let snapshot = settings.snapshot().await;
    println!("configuration OK");
    println!("  http port:        {}", snapshot.http_port);
    match &snapshot.tls {
        Some(tls) => println!(
            "  https port:       {} ({})",
            snapshot.https_port,
            tls.cert_path.display()
        ),
        None => println!("  https port:       disabled"),
    }
    println!("  temp dir:         {}", snapshot.temp_dir.display());
    println!("  workers / queue:  {} / {}", snapshot.max_concurrent_scans, snapshot.queue_capacity);
    println!(
        "  storage account:  {}.{}",
        snapshot.storage.account_name, snapshot.storage.host
    );
    println!("  completed topic:  {}", snapshot.completed_topic.uri);
    println!("  error topic:      {}", snapshot.error_topic.uri);

    let scanner = ClamAvScanner::new(ClamAvConfig::from_settings(&snapshot.clamav))
        .context("invalid scanner configuration")?;
    scanner
        .health_check()
        .await
        .context("scanner health check failed")?;
    println!("  scanner:          {} reachable", scanner.name());
    Ok(())
}
