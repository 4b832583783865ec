#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use offline_streams_core::config::ServiceDefinition;
use offline_streams_core::envelope::StreamEvent;
use offline_streams_core::error::HandlerError;
use offline_streams_core::log_sink::RecordingSink;
use offline_streams_runtime::adapters::launcher::LauncherConfig;
use offline_streams_runtime::adapters::memory::InMemoryBroker;
use offline_streams_runtime::handlers::HandlerRegistry;
use offline_streams_runtime::orchestrator::{Orchestrator, OrchestratorConfig, RunningStreams};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub type Captured = Arc<Mutex<Vec<StreamEvent>>>;

/// In-memory broker, registry and sink wired to an orchestrator. A local
/// listener stands in for the broker port so the reachability check passes.
pub struct Harness {
    pub broker: Arc<InMemoryBroker>,
    pub registry: Arc<HandlerRegistry>,
    pub sink: Arc<RecordingSink>,
    listener: TcpListener,
}

impl Harness {
    pub async fn new() -> Self {
        Self {
            broker: Arc::new(InMemoryBroker::new()),
            registry: Arc::new(HandlerRegistry::new()),
            sink: Arc::new(RecordingSink::new()),
            listener: TcpListener::bind("127.0.0.1:0")
                .await
                .expect("listener should bind"),
        }
    }

    /// Registers a handler that records every event it receives.
    pub fn capture(&self, reference: &str) -> Captured {
        self.fail_first(reference, 0)
    }

    /// Like [`Harness::capture`], but the first `failures` invocations fail
    /// after recording their event.
    pub fn fail_first(&self, reference: &str, failures: usize) -> Captured {
        let events: Captured = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        self.registry.register_fn(reference, move |event: StreamEvent| {
            let captured = Arc::clone(&captured);
            async move {
                let mut events = captured.lock().expect("poisoned mutex");
                events.push(event);
                if events.len() <= failures {
                    Err(HandlerError::new(format!("induced failure #{}", events.len())))
                } else {
                    Ok(json!({ "statusCode": 200 }))
                }
            }
        });
        events
    }

    pub fn config(&self, service_yaml: &str) -> OrchestratorConfig {
        let service =
            ServiceDefinition::from_yaml_str(service_yaml).expect("service should parse");
        let port = self.listener.local_addr().expect("address").port();
        let mut config =
            OrchestratorConfig::from_service(&service).expect("plugin config should build");
        config.launcher = LauncherConfig {
            connect_attempts: 5,
            connect_interval: Duration::from_millis(10),
            ..LauncherConfig::new("127.0.0.1", port)
        };
        config.settle_interval = Duration::from_millis(5);
        config
    }

    pub async fn start(&self, service_yaml: &str) -> RunningStreams {
        Orchestrator::new(
            self.config(service_yaml),
            self.broker.clone(),
            self.registry.clone(),
            self.sink.clone(),
        )
        .start(CancellationToken::new())
        .await
        .expect("startup should succeed")
    }
}

pub fn events(captured: &Captured) -> Vec<StreamEvent> {
    captured.lock().expect("poisoned mutex").clone()
}

pub fn record_count(captured: &Captured) -> usize {
    events(captured).iter().map(StreamEvent::len).sum()
}

/// Polls `condition` every 20 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
