//! Subscription resolution: which handler consumes which stream, and how.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{FunctionDefinition, Functions, StreamEventDeclaration};
use crate::log_sink::LogSink;
use crate::stream::CursorRequest;

pub const STREAM_EVENT_KIND: &str = "kinesis";
pub const BROKER_RESOURCE_MARKER: &str = "kinesis";
pub const DEFAULT_BATCH_SIZE: u32 = 10;
/// Largest `Limit` a GetRecords call accepts.
pub const MAX_BATCH_SIZE: u32 = 10_000;
pub const DEFAULT_BATCH_WINDOW_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartingPosition {
    #[default]
    Latest,
    TrimHorizon,
    AtSequenceNumber,
    AtTimestamp,
}

impl StartingPosition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "LATEST",
            Self::TrimHorizon => "TRIM_HORIZON",
            Self::AtSequenceNumber => "AT_SEQUENCE_NUMBER",
            Self::AtTimestamp => "AT_TIMESTAMP",
        }
    }
}

impl fmt::Display for StartingPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binding of one handler to one stream. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub function_name: String,
    pub stream_name: String,
    pub handler: String,
    pub batch_size: u32,
    pub batch_window: Duration,
    pub starting_position: StartingPosition,
    pub starting_timestamp: Option<DateTime<Utc>>,
    pub starting_sequence_number: Option<String>,
}

impl Subscription {
    pub fn cursor_request(&self) -> CursorRequest {
        CursorRequest {
            position: self.starting_position,
            sequence_number: self.starting_sequence_number.clone(),
            timestamp: self.starting_timestamp,
        }
    }
}

/// Derives the active subscriptions from the function definitions.
///
/// A (function, event) pair is kept when the function has a handler, the
/// event is a kinesis stream trigger whose arn names the broker resource, and
/// the event is enabled. Disabled triggers are reported to `sink` once each.
pub fn resolve_subscriptions(functions: &Functions, sink: &dyn LogSink) -> Vec<Subscription> {
    functions
        .iter()
        .flat_map(|(function_name, function)| {
            resolve_function(function_name, function, sink)
        })
        .collect()
}

fn resolve_function(
    function_name: &str,
    function: &FunctionDefinition,
    sink: &dyn LogSink,
) -> Vec<Subscription> {
    let handler = function.handler.as_deref().unwrap_or_default();
    if handler.is_empty() {
        return Vec::new();
    }

    function
        .events
        .iter()
        .filter_map(|event| event.stream.as_ref())
        .filter(|stream| is_broker_stream(stream))
        .filter(|stream| {
            if stream.enabled.unwrap_or(false) {
                return true;
            }
            sink.log(&format!(
                "{function_name} - is being ignored from Kinesis stream due to its 'enabled' flag being falsy"
            ));
            false
        })
        .map(|stream| build_subscription(function_name, handler, stream))
        .collect()
}

fn is_broker_stream(stream: &StreamEventDeclaration) -> bool {
    stream.kind.as_deref() == Some(STREAM_EVENT_KIND)
        && stream
            .arn
            .as_deref()
            .is_some_and(|arn| arn.contains(BROKER_RESOURCE_MARKER))
}

fn build_subscription(
    function_name: &str,
    handler: &str,
    stream: &StreamEventDeclaration,
) -> Subscription {
    let batch_window_secs = stream.batch_window.unwrap_or(DEFAULT_BATCH_WINDOW_SECS);

    Subscription {
        function_name: function_name.to_string(),
        stream_name: stream_name_from_arn(stream.arn.as_deref()),
        handler: handler.to_string(),
        batch_size: stream
            .batch_size
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .clamp(1, MAX_BATCH_SIZE),
        batch_window: Duration::from_millis(batch_window_secs.saturating_mul(1_000)),
        starting_position: stream.starting_position.unwrap_or_default(),
        starting_timestamp: stream
            .starting_position_timestamp
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        starting_sequence_number: stream.starting_sequence_number.clone(),
    }
}

/// Everything after the first `/`; the whole arn when there is none.
pub fn stream_name_from_arn(arn: Option<&str>) -> String {
    match arn {
        Some(arn) => match arn.split_once('/') {
            Some((_, name)) => name.to_string(),
            None => arn.to_string(),
        },
        None => String::new(),
    }
}
