//! Shard poll loop: one per subscription.
//!
//! The loop owns its shard cursor. Each iteration fetches up to `batch_size`
//! records, dispatches a non-empty batch, swaps in the broker's next cursor,
//! then waits `batch_window` before the next fetch. The wait starts once the
//! dispatch has settled, so a slow handler stretches the period instead of
//! overlapping fetches. Only the first shard of a stream is read.

use std::sync::Arc;

use offline_streams_core::error::BrokerError;
use offline_streams_core::log_sink::LogSink;
use offline_streams_core::stream::ShardCursor;
use offline_streams_core::subscription::Subscription;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::broker::BrokerClient;
use crate::dispatch::RecordDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Initializing,
    Polling,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was fetched, the handler was not called.
    Skipped,
    Delivered,
    /// The batch was dropped after the handler or its resolution failed.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub fetched: usize,
    pub dispatch: DispatchOutcome,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("failed to open a cursor on stream '{stream}': {source}")]
    Bootstrap {
        stream: String,
        #[source]
        source: BrokerError,
    },

    #[error("stream '{stream}' has no shards")]
    NoShards { stream: String },

    #[error("failed to fetch records from stream '{stream}': {source}")]
    Fetch {
        stream: String,
        #[source]
        source: BrokerError,
    },

    #[error("poller for stream '{stream}' is {state:?}")]
    NotPolling { stream: String, state: PollerState },
}

pub struct ShardPoller {
    subscription: Subscription,
    broker: Arc<dyn BrokerClient>,
    dispatcher: RecordDispatcher,
    sink: Arc<dyn LogSink>,
    state: PollerState,
    shard_id: Option<String>,
    cursor: Option<ShardCursor>,
}

impl ShardPoller {
    pub fn new(
        subscription: Subscription,
        broker: Arc<dyn BrokerClient>,
        dispatcher: RecordDispatcher,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            subscription,
            broker,
            dispatcher,
            sink,
            state: PollerState::Initializing,
            shard_id: None,
            cursor: None,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn cursor(&self) -> Option<&ShardCursor> {
        self.cursor.as_ref()
    }

    pub fn shard_id(&self) -> Option<&str> {
        self.shard_id.as_deref()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Describes the stream and opens a cursor on its first shard at the
    /// subscription's starting position.
    pub async fn initialize(&mut self) -> Result<(), PollError> {
        let stream_name = self.subscription.stream_name.clone();
        let description = self
            .broker
            .describe_stream(&stream_name)
            .await
            .map_err(|source| PollError::Bootstrap {
                stream: stream_name.clone(),
                source,
            })?;

        let shard = description
            .shards
            .first()
            .ok_or_else(|| PollError::NoShards {
                stream: stream_name.clone(),
            })?;
        if description.shards.len() > 1 {
            debug!(
                stream = %stream_name,
                shards = description.shards.len(),
                "only the first shard is polled"
            );
        }

        let cursor = self
            .broker
            .get_shard_cursor(
                &stream_name,
                &shard.shard_id,
                &self.subscription.cursor_request(),
            )
            .await
            .map_err(|source| PollError::Bootstrap {
                stream: stream_name.clone(),
                source,
            })?;

        info!(
            stream = %stream_name,
            shard_id = %shard.shard_id,
            function = %self.subscription.function_name,
            starting_position = %self.subscription.starting_position,
            "polling shard"
        );
        self.shard_id = Some(shard.shard_id.clone());
        self.cursor = Some(cursor);
        self.state = PollerState::Polling;
        Ok(())
    }

    /// One fetch and, when records came back, one dispatch.
    ///
    /// Dispatch failures are logged and the batch is skipped; the cursor
    /// still advances. Fetch failures keep the current cursor, except an
    /// expired cursor, which sends the poller back to `Initializing`.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, PollError> {
        let cursor = match (self.state, self.cursor.clone()) {
            (PollerState::Polling, Some(cursor)) => cursor,
            (state, _) => {
                return Err(PollError::NotPolling {
                    stream: self.subscription.stream_name.clone(),
                    state,
                })
            }
        };

        let page = match self
            .broker
            .get_records(&cursor, self.subscription.batch_size)
            .await
        {
            Ok(page) => page,
            Err(source) => {
                if source == BrokerError::ExpiredCursor {
                    self.state = PollerState::Initializing;
                    self.cursor = None;
                }
                return Err(PollError::Fetch {
                    stream: self.subscription.stream_name.clone(),
                    source,
                });
            }
        };

        let fetched = page.records.len();
        let dispatch = if fetched == 0 {
            DispatchOutcome::Skipped
        } else {
            match self
                .dispatcher
                .dispatch(&page.records, &self.subscription.handler)
                .await
            {
                Ok(_) => DispatchOutcome::Delivered,
                Err(dispatch_error) => {
                    error!(
                        stream = %self.subscription.stream_name,
                        function = %self.subscription.function_name,
                        records = fetched,
                        error = %dispatch_error,
                        "batch dispatch failed, skipping batch"
                    );
                    self.sink.log(&format!(
                        "{} - failed to process {fetched} record(s) from '{}': {dispatch_error}",
                        self.subscription.function_name, self.subscription.stream_name
                    ));
                    DispatchOutcome::Failed(dispatch_error.to_string())
                }
            }
        };

        match page.next_cursor {
            Some(next_cursor) => self.cursor = Some(next_cursor),
            None => {
                info!(stream = %self.subscription.stream_name, "shard closed");
                self.cursor = None;
                self.state = PollerState::Terminated;
            }
        }

        Ok(PollOutcome { fetched, dispatch })
    }

    /// Polls until `cancel` fires or the shard closes.
    ///
    /// Returns an error only when the very first bootstrap fails; later
    /// failures are logged and retried on the next window.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), PollError> {
        let mut bootstrapped = false;

        loop {
            if self.state == PollerState::Initializing {
                let initialized = tokio::select! {
                    _ = cancel.cancelled() => break,
                    initialized = self.initialize() => initialized,
                };
                match initialized {
                    Ok(()) => bootstrapped = true,
                    Err(error) if !bootstrapped => {
                        self.state = PollerState::Terminated;
                        return Err(error);
                    }
                    Err(error) => self.report(&error),
                }
            }

            if self.state == PollerState::Polling {
                let polled = tokio::select! {
                    _ = cancel.cancelled() => break,
                    polled = self.poll_once() => polled,
                };
                if let Err(error) = polled {
                    self.report(&error);
                }
            }

            if self.state == PollerState::Terminated {
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.subscription.batch_window) => {}
            }
        }

        debug!(stream = %self.subscription.stream_name, "poller cancelled");
        self.state = PollerState::Terminated;
        Ok(())
    }

    fn report(&self, error: &PollError) {
        warn!(
            stream = %self.subscription.stream_name,
            function = %self.subscription.function_name,
            %error,
            "poll iteration failed"
        );
        self.sink.log(&format!(
            "{} - {error}",
            self.subscription.function_name
        ));
    }
}
