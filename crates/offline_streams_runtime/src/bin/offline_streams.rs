use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use offline_streams_core::config::ServiceDefinition;
use offline_streams_core::error::{ConfigurationError, StartupError};
use offline_streams_runtime::adapters::kinesis::KinesisBroker;
use offline_streams_runtime::handlers::CommandResolver;
use offline_streams_runtime::logging::{init_tracing, LogFormat, TracingSink};
use offline_streams_runtime::orchestrator::{
    Orchestrator, OrchestratorConfig, DEFAULT_BROKER_HOST,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "offline_streams",
    about = "Local Kinesis stream consumption for serverless functions",
    long_about = "Provisions the streams declared under custom.offlineKinesisStreams on a local\n\
                  broker and polls them, invoking each subscribed function handler with\n\
                  batches of records until interrupted."
)]
struct Cli {
    /// Service definition to read
    #[arg(long, env = "OFFLINE_STREAMS_SERVICE_FILE", default_value = "serverless.yml")]
    service_file: PathBuf,

    /// Directory handler references are resolved against (defaults to the
    /// service file's directory)
    #[arg(long, env = "OFFLINE_STREAMS_SERVICE_PATH")]
    service_path: Option<PathBuf>,

    /// Host the local broker listens on
    #[arg(long, env = "OFFLINE_STREAMS_BROKER_HOST", default_value = DEFAULT_BROKER_HOST)]
    broker_host: String,

    /// Command that starts the broker, e.g. "kinesalite --port {port}"
    #[arg(long, env = "OFFLINE_STREAMS_BROKER_COMMAND")]
    broker_command: Option<String>,

    /// Milliseconds between readiness checks on a newly created stream
    #[arg(long, env = "OFFLINE_STREAMS_SETTLE_MS")]
    settle_ms: Option<u64>,

    #[arg(long, env = "OFFLINE_STREAMS_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to initialise logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Startup(#[from] StartupError),
}

fn service_path(cli: &Cli) -> PathBuf {
    cli.service_path.clone().unwrap_or_else(|| {
        cli.service_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut term), Ok(mut int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT");
        return;
    };

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT");
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let service = ServiceDefinition::from_path(&cli.service_file)?;
    let mut config = OrchestratorConfig::from_service(&service)?;
    config.launcher.host = cli.broker_host.clone();
    config.launcher.command = cli.broker_command.clone();
    if let Some(settle_ms) = cli.settle_ms {
        config.settle_interval = Duration::from_millis(settle_ms);
    }

    let broker = KinesisBroker::connect(&config.launcher.endpoint(), &config.plugin.region).await;
    let resolver = CommandResolver::new(service_path(&cli));
    info!(
        service_file = %cli.service_file.display(),
        endpoint = %config.launcher.endpoint(),
        "starting offline streams"
    );

    let running = Orchestrator::new(
        config,
        Arc::new(broker),
        Arc::new(resolver),
        Arc::new(TracingSink),
    )
    .start(CancellationToken::new())
    .await?;

    tokio::select! {
        _ = wait_for_signal() => {}
        _ = running.finished() => info!("every polled shard has closed"),
    }
    running.shutdown().await;
    Ok(())
}
