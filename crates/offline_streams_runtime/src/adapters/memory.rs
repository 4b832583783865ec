//! In-process broker used by tests. Cursors are unique tokens so cursor
//! chaining can be asserted from the recorded fetch calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use offline_streams_core::error::BrokerError;
use offline_streams_core::stream::{
    CursorRequest, RawRecord, RecordPage, ShardCursor, ShardDescription, StreamDescription,
};
use offline_streams_core::subscription::StartingPosition;

use crate::adapters::broker::BrokerClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub cursor: ShardCursor,
    pub limit: u32,
    pub returned: usize,
    pub next_cursor: Option<ShardCursor>,
}

#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: BTreeMap<String, MemoryStream>,
    cursors: HashMap<String, CursorPosition>,
    next_token: u64,
    next_sequence: u64,
    fetches: Vec<FetchCall>,
    created: Vec<(String, u32)>,
    cursor_requests: Vec<(String, String, CursorRequest)>,
    fetch_failures: VecDeque<BrokerError>,
    create_failures: VecDeque<BrokerError>,
    unready_describes: u32,
    describe_calls: u32,
}

#[derive(Debug, Default)]
struct MemoryStream {
    shards: Vec<Vec<RawRecord>>,
    closed: bool,
}

#[derive(Debug, Clone)]
struct CursorPosition {
    stream: String,
    shard: usize,
    offset: usize,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream directly, bypassing readiness simulation.
    pub fn with_stream(self, stream_name: &str, shard_count: u32) -> Self {
        self.lock().insert_stream(stream_name, shard_count);
        self
    }

    /// Appends a record to the shard chosen by its partition key and returns
    /// its sequence number.
    pub fn put_record(&self, stream_name: &str, partition_key: &str, payload: &[u8]) -> String {
        let mut state = self.lock();
        state.next_sequence += 1;
        let sequence_number = state.next_sequence.to_string();
        let stream = state
            .streams
            .entry(stream_name.to_string())
            .or_insert_with(|| MemoryStream {
                shards: vec![Vec::new()],
                closed: false,
            });
        let shard = shard_for_key(partition_key, stream.shards.len());
        stream.shards[shard].push(RawRecord {
            arrival_timestamp: None,
            payload: payload.to_vec(),
            partition_key: partition_key.to_string(),
            sequence_number: sequence_number.clone(),
        });
        sequence_number
    }

    /// Once every record is read, `get_records` stops returning a next cursor.
    pub fn close_stream(&self, stream_name: &str) {
        if let Some(stream) = self.lock().streams.get_mut(stream_name) {
            stream.closed = true;
        }
    }

    pub fn fail_next_fetch(&self, error: BrokerError) {
        self.lock().fetch_failures.push_back(error);
    }

    pub fn fail_next_create(&self, error: BrokerError) {
        self.lock().create_failures.push_back(error);
    }

    /// The next `count` describe calls report no shards, as a broker still
    /// converging after creation would.
    pub fn delay_readiness(&self, count: u32) {
        self.lock().unready_describes = count;
    }

    /// Invalidates every cursor handed out so far.
    pub fn expire_cursors(&self) {
        self.lock().cursors.clear();
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        self.lock().fetches.clone()
    }

    pub fn created_streams(&self) -> Vec<(String, u32)> {
        self.lock().created.clone()
    }

    pub fn cursor_requests(&self) -> Vec<(String, String, CursorRequest)> {
        self.lock().cursor_requests.clone()
    }

    pub fn describe_calls(&self) -> u32 {
        self.lock().describe_calls
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BrokerState {
    fn insert_stream(&mut self, stream_name: &str, shard_count: u32) {
        self.streams
            .entry(stream_name.to_string())
            .or_insert_with(|| MemoryStream {
                shards: vec![Vec::new(); shard_count.max(1) as usize],
                closed: false,
            });
    }

    fn issue_cursor(&mut self, position: CursorPosition) -> ShardCursor {
        self.next_token += 1;
        let token = format!(
            "{}:{}:{}:{}",
            position.stream, position.shard, position.offset, self.next_token
        );
        self.cursors.insert(token.clone(), position);
        ShardCursor::new(token)
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn create_stream(&self, stream_name: &str, shard_count: u32) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }
        state.created.push((stream_name.to_string(), shard_count));
        state.insert_stream(stream_name, shard_count);
        Ok(())
    }

    async fn describe_stream(&self, stream_name: &str) -> Result<StreamDescription, BrokerError> {
        let mut state = self.lock();
        state.describe_calls += 1;
        let shard_count = state
            .streams
            .get(stream_name)
            .map(|stream| stream.shards.len())
            .ok_or_else(|| {
                BrokerError::request("DescribeStream", format!("stream {stream_name} not found"))
            })?;

        if state.unready_describes > 0 {
            state.unready_describes -= 1;
            return Ok(StreamDescription {
                stream_name: stream_name.to_string(),
                shards: Vec::new(),
            });
        }

        Ok(StreamDescription {
            stream_name: stream_name.to_string(),
            shards: (0..shard_count)
                .map(|index| ShardDescription {
                    shard_id: shard_id(index),
                })
                .collect(),
        })
    }

    async fn get_shard_cursor(
        &self,
        stream_name: &str,
        shard_id: &str,
        request: &CursorRequest,
    ) -> Result<ShardCursor, BrokerError> {
        let mut state = self.lock();
        state.cursor_requests.push((
            stream_name.to_string(),
            shard_id.to_string(),
            request.clone(),
        ));

        let shard = shard_index(shard_id).ok_or_else(|| {
            BrokerError::request("GetShardIterator", format!("unknown shard {shard_id}"))
        })?;
        let records = state
            .streams
            .get(stream_name)
            .and_then(|stream| stream.shards.get(shard))
            .ok_or_else(|| {
                BrokerError::request("GetShardIterator", format!("stream {stream_name} not found"))
            })?;

        let offset = match request.position {
            StartingPosition::Latest => records.len(),
            StartingPosition::TrimHorizon => 0,
            StartingPosition::AtSequenceNumber => {
                let sequence_number = request.sequence_number.as_deref().ok_or(
                    BrokerError::MissingStartingParameter {
                        position: request.position,
                        field: "startingSequenceNumber",
                    },
                )?;
                records
                    .iter()
                    .position(|record| record.sequence_number == sequence_number)
                    .unwrap_or(records.len())
            }
            StartingPosition::AtTimestamp => {
                let timestamp = request.timestamp.ok_or(BrokerError::MissingStartingParameter {
                    position: request.position,
                    field: "startingPositionTimestamp",
                })?;
                records
                    .iter()
                    .position(|record| {
                        record
                            .arrival_timestamp
                            .is_some_and(|arrival| arrival >= timestamp)
                    })
                    .unwrap_or(records.len())
            }
        };

        Ok(state.issue_cursor(CursorPosition {
            stream: stream_name.to_string(),
            shard,
            offset,
        }))
    }

    async fn get_records(
        &self,
        cursor: &ShardCursor,
        limit: u32,
    ) -> Result<RecordPage, BrokerError> {
        let mut state = self.lock();
        if let Some(error) = state.fetch_failures.pop_front() {
            return Err(error);
        }

        let position = state
            .cursors
            .get(cursor.as_str())
            .cloned()
            .ok_or(BrokerError::ExpiredCursor)?;
        let stream = state
            .streams
            .get(&position.stream)
            .ok_or_else(|| BrokerError::request("GetRecords", "stream was deleted"))?;
        let shard = &stream.shards[position.shard];
        let end = shard.len().min(position.offset + limit as usize);
        let records = shard[position.offset.min(end)..end].to_vec();
        let exhausted = stream.closed && end == shard.len();

        let next_cursor = if exhausted {
            None
        } else {
            Some(state.issue_cursor(CursorPosition { offset: end, ..position }))
        };

        state.fetches.push(FetchCall {
            cursor: cursor.clone(),
            limit,
            returned: records.len(),
            next_cursor: next_cursor.clone(),
        });

        Ok(RecordPage {
            records,
            next_cursor,
        })
    }
}

pub fn shard_id(index: usize) -> String {
    format!("shardId-{index:012}")
}

fn shard_index(shard_id: &str) -> Option<usize> {
    shard_id.strip_prefix("shardId-")?.parse().ok()
}

fn shard_for_key(partition_key: &str, shard_count: usize) -> usize {
    let sum: usize = partition_key.bytes().map(usize::from).sum();
    sum % shard_count.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trim_horizon_reads_from_the_start_and_chains_cursors() {
        let broker = InMemoryBroker::new().with_stream("orders", 1);
        broker.put_record("orders", "a", b"1");
        broker.put_record("orders", "a", b"2");
        broker.put_record("orders", "a", b"3");

        let cursor = broker
            .get_shard_cursor("orders", &shard_id(0), &CursorRequest::at(StartingPosition::TrimHorizon))
            .await
            .expect("cursor should be issued");
        let first = broker.get_records(&cursor, 2).await.expect("first page");
        let second = broker
            .get_records(first.next_cursor.as_ref().expect("next cursor"), 2)
            .await
            .expect("second page");

        assert_eq!(first.records.len(), 2);
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].payload, b"3");
        assert_ne!(first.next_cursor, second.next_cursor);
    }

    #[tokio::test]
    async fn latest_skips_existing_records() {
        let broker = InMemoryBroker::new().with_stream("orders", 1);
        broker.put_record("orders", "a", b"old");

        let cursor = broker
            .get_shard_cursor("orders", &shard_id(0), &CursorRequest::default())
            .await
            .expect("cursor should be issued");
        broker.put_record("orders", "a", b"new");
        let page = broker.get_records(&cursor, 10).await.expect("page");

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].payload, b"new");
    }

    #[tokio::test]
    async fn expired_cursors_are_rejected() {
        let broker = InMemoryBroker::new().with_stream("orders", 1);
        let cursor = broker
            .get_shard_cursor("orders", &shard_id(0), &CursorRequest::default())
            .await
            .expect("cursor should be issued");

        broker.expire_cursors();

        assert_eq!(
            broker.get_records(&cursor, 10).await,
            Err(BrokerError::ExpiredCursor)
        );
    }

    #[tokio::test]
    async fn closed_stream_ends_with_no_next_cursor() {
        let broker = InMemoryBroker::new().with_stream("orders", 1);
        broker.put_record("orders", "a", b"1");
        broker.close_stream("orders");
        let cursor = broker
            .get_shard_cursor("orders", &shard_id(0), &CursorRequest::at(StartingPosition::TrimHorizon))
            .await
            .expect("cursor should be issued");

        let page = broker.get_records(&cursor, 10).await.expect("page");

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_cursor, None);
    }
}
