//! Broker-facing data model shared by the broker client contract and the
//! poll loop.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::subscription::StartingPosition;

/// Opaque, broker-issued read position within one shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardCursor(String);

impl ShardCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescription {
    pub shard_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub stream_name: String,
    pub shards: Vec<ShardDescription>,
}

/// Where a fresh cursor should start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorRequest {
    pub position: StartingPosition,
    pub sequence_number: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CursorRequest {
    pub fn at(position: StartingPosition) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// A record as returned by the broker, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub arrival_timestamp: Option<DateTime<Utc>>,
    pub payload: Vec<u8>,
    pub partition_key: String,
    pub sequence_number: String,
}

/// One `get_records` response. `next_cursor` is `None` once the shard is
/// closed and fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage {
    pub records: Vec<RawRecord>,
    pub next_cursor: Option<ShardCursor>,
}
