//! Startup sequence: reach the broker, provision every configured stream,
//! resolve subscriptions and hand each one to its own poll loop.

use std::sync::Arc;
use std::time::Duration;

use offline_streams_core::config::{Functions, PluginConfig, ServiceDefinition, StreamConfig};
use offline_streams_core::error::{ConfigurationError, ProvisioningError, StartupError};
use offline_streams_core::log_sink::LogSink;
use offline_streams_core::subscription::{resolve_subscriptions, Subscription};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::adapters::broker::BrokerClient;
use crate::adapters::launcher::{ensure_running, BrokerProcess, LauncherConfig};
use crate::dispatch::RecordDispatcher;
use crate::handlers::HandlerResolver;
use crate::poller::ShardPoller;

pub const DEFAULT_BROKER_HOST: &str = "localhost";
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_SETTLE_ATTEMPTS: u32 = 25;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub plugin: PluginConfig,
    pub functions: Functions,
    pub launcher: LauncherConfig,
    /// Wait between describe calls while a new stream converges.
    pub settle_interval: Duration,
    pub settle_attempts: u32,
}

impl OrchestratorConfig {
    pub fn from_service(service: &ServiceDefinition) -> Result<Self, ConfigurationError> {
        let plugin = service.plugin_config()?;
        Ok(Self {
            launcher: LauncherConfig::new(DEFAULT_BROKER_HOST, plugin.port),
            functions: service.functions.clone(),
            plugin,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            settle_attempts: DEFAULT_SETTLE_ATTEMPTS,
        })
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    broker: Arc<dyn BrokerClient>,
    resolver: Arc<dyn HandlerResolver>,
    sink: Arc<dyn LogSink>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        broker: Arc<dyn BrokerClient>,
        resolver: Arc<dyn HandlerResolver>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            config,
            broker,
            resolver,
            sink,
        }
    }

    /// Runs the startup sequence and returns once every poll loop has been
    /// spawned. Loops are not awaited; they stop when `cancel` fires or
    /// through [`RunningStreams::shutdown`].
    ///
    /// A startup failure is logged once and returned.
    pub async fn start(self, cancel: CancellationToken) -> Result<RunningStreams, StartupError> {
        match self.bootstrap(cancel).await {
            Ok(running) => Ok(running),
            Err(startup_error) => {
                error!(error = %startup_error, "startup failed");
                self.sink.log(&startup_error.to_string());
                Err(startup_error)
            }
        }
    }

    async fn bootstrap(&self, cancel: CancellationToken) -> Result<RunningStreams, StartupError> {
        self.config.plugin.validate()?;
        let broker_process = ensure_running(&self.config.launcher, self.sink.as_ref()).await?;

        for stream in &self.config.plugin.streams {
            self.provision(stream).await?;
        }

        let subscriptions = resolve_subscriptions(&self.config.functions, self.sink.as_ref());
        info!(count = subscriptions.len(), "starting poll loops");

        let tracker = TaskTracker::new();
        for subscription in &subscriptions {
            self.spawn_poller(&tracker, subscription.clone(), cancel.child_token());
        }
        tracker.close();

        Ok(RunningStreams {
            cancel,
            tracker,
            subscriptions,
            _broker_process: broker_process,
        })
    }

    /// Creates the stream, then describes it until shard metadata shows up.
    async fn provision(&self, stream: &StreamConfig) -> Result<(), ProvisioningError> {
        let name = stream.stream_name.as_str();
        self.broker
            .create_stream(name, stream.shard_count)
            .await
            .map_err(|source| ProvisioningError::CreateStream {
                stream: name.to_string(),
                source,
            })?;

        let attempts = self.config.settle_attempts.max(1);
        for attempt in 1..=attempts {
            match self.broker.describe_stream(name).await {
                Ok(description) if !description.shards.is_empty() => {
                    info!(stream = name, shards = description.shards.len(), "stream ready");
                    self.sink.log(&format!(
                        "'{name}' created with {} shard(s)",
                        description.shards.len()
                    ));
                    return Ok(());
                }
                Ok(_) => debug!(stream = name, attempt, "stream has no shards yet"),
                Err(error) => debug!(stream = name, attempt, %error, "stream not describable yet"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.settle_interval).await;
            }
        }

        Err(ProvisioningError::NotReady {
            stream: name.to_string(),
            attempts,
        })
    }

    fn spawn_poller(
        &self,
        tracker: &TaskTracker,
        subscription: Subscription,
        cancel: CancellationToken,
    ) {
        let function_name = subscription.function_name.clone();
        let stream_name = subscription.stream_name.clone();
        let sink = Arc::clone(&self.sink);
        let poller = ShardPoller::new(
            subscription,
            Arc::clone(&self.broker),
            RecordDispatcher::new(Arc::clone(&self.resolver), Arc::clone(&self.sink)),
            Arc::clone(&self.sink),
        );

        tracker.spawn(async move {
            if let Err(poll_error) = poller.run(cancel).await {
                error!(
                    function = %function_name,
                    stream = %stream_name,
                    error = %poll_error,
                    "poll loop failed to start"
                );
                sink.log(&format!("{function_name} - {poll_error}"));
            }
        });
    }
}

/// Poll loops spawned by a successful startup.
pub struct RunningStreams {
    cancel: CancellationToken,
    tracker: TaskTracker,
    subscriptions: Vec<Subscription>,
    _broker_process: BrokerProcess,
}

impl RunningStreams {
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn active_loops(&self) -> usize {
        self.tracker.len()
    }

    /// Resolves once every loop has ended on its own, for example because
    /// all polled shards were closed.
    pub async fn finished(&self) {
        self.tracker.wait().await;
    }

    /// Cancels every loop and waits for them to stop. A broker process
    /// started at launch is killed afterwards.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.wait().await;
        info!("all poll loops stopped");
    }
}
