//! Makes sure a stream broker is listening before anything talks to it,
//! optionally spawning a local emulator process first.

use std::process::Stdio;
use std::time::Duration;

use offline_streams_core::error::ProvisioningError;
use offline_streams_core::log_sink::LogSink;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 50;
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    pub host: String,
    pub port: u16,
    /// Emulator command line; `{port}` is replaced with the configured port.
    pub command: Option<String>,
    pub connect_attempts: u32,
    pub connect_interval: Duration,
}

impl LauncherConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            command: None,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_interval: DEFAULT_CONNECT_INTERVAL,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Handle to a broker the launcher started. Dropping it stops the process.
#[derive(Debug, Default)]
pub struct BrokerProcess {
    child: Option<Child>,
}

impl BrokerProcess {
    pub fn is_managed(&self) -> bool {
        self.child.is_some()
    }
}

pub async fn ensure_running(
    config: &LauncherConfig,
    sink: &dyn LogSink,
) -> Result<BrokerProcess, ProvisioningError> {
    let mut process = BrokerProcess {
        child: config
            .command
            .as_deref()
            .map(|command| spawn_broker(command, config))
            .transpose()?,
    };

    let mut last_error = String::from("no connection attempt made");
    for attempt in 1..=config.connect_attempts.max(1) {
        if let Some(child) = process.child.as_mut() {
            if let Some(status) = child.try_wait().map_err(|error| broker_unreachable(config, error))? {
                return Err(broker_unreachable(
                    config,
                    format!("broker process exited with {status} before accepting connections"),
                ));
            }
        }

        match TcpStream::connect((config.host.as_str(), config.port)).await {
            Ok(_) => {
                info!(port = config.port, attempt, "stream broker is reachable");
                sink.log(&format!("Local kinesis is running at {}", config.port));
                return Ok(process);
            }
            Err(error) => {
                debug!(port = config.port, attempt, %error, "stream broker not reachable yet");
                last_error = error.to_string();
            }
        }

        tokio::time::sleep(config.connect_interval).await;
    }

    Err(broker_unreachable(config, last_error))
}

fn spawn_broker(command: &str, config: &LauncherConfig) -> Result<Child, ProvisioningError> {
    let command_line = command.replace("{port}", &config.port.to_string());
    let mut parts = command_line.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| broker_unreachable(config, "broker command is empty"))?;

    info!(command = %command_line, "starting local stream broker");
    Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|error| broker_unreachable(config, format!("failed to start '{program}': {error}")))
}

fn broker_unreachable(config: &LauncherConfig, reason: impl ToString) -> ProvisioningError {
    ProvisioningError::BrokerUnreachable {
        endpoint: config.endpoint(),
        reason: reason.to_string(),
    }
}
