use async_trait::async_trait;
use aws_sdk_kinesis::config::{Credentials, Region};
use aws_sdk_kinesis::error::DisplayErrorContext;
use aws_sdk_kinesis::primitives::DateTime as SmithyDateTime;
use aws_sdk_kinesis::types::{Record, ShardIteratorType};
use chrono::{DateTime, Utc};
use offline_streams_core::error::BrokerError;
use offline_streams_core::stream::{
    CursorRequest, RawRecord, RecordPage, ShardCursor, ShardDescription, StreamDescription,
};
use offline_streams_core::subscription::{StartingPosition, MAX_BATCH_SIZE};
use tracing::debug;

use crate::adapters::broker::BrokerClient;

/// Local emulators accept any signature, so a fixed key pair is enough.
const LOCAL_ACCESS_KEY: &str = "offline";
const LOCAL_SECRET_KEY: &str = "offline";

/// [`BrokerClient`] backed by the Kinesis API of a local emulator.
#[derive(Debug, Clone)]
pub struct KinesisBroker {
    client: aws_sdk_kinesis::Client,
}

impl KinesisBroker {
    pub fn new(client: aws_sdk_kinesis::Client) -> Self {
        Self { client }
    }

    pub async fn connect(endpoint: &str, region: &str) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(Credentials::new(
                LOCAL_ACCESS_KEY,
                LOCAL_SECRET_KEY,
                None,
                None,
                "offline-streams",
            ))
            .load()
            .await;

        Self::new(aws_sdk_kinesis::Client::new(&aws_config))
    }
}

#[async_trait]
impl BrokerClient for KinesisBroker {
    async fn create_stream(&self, stream_name: &str, shard_count: u32) -> Result<(), BrokerError> {
        let result = self
            .client
            .create_stream()
            .stream_name(stream_name)
            .shard_count(i32::try_from(shard_count).unwrap_or(i32::MAX))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|service| service.is_resource_in_use_exception()) =>
            {
                debug!(stream = stream_name, "stream already exists");
                Ok(())
            }
            Err(error) => Err(BrokerError::request(
                "CreateStream",
                DisplayErrorContext(&error).to_string(),
            )),
        }
    }

    async fn describe_stream(&self, stream_name: &str) -> Result<StreamDescription, BrokerError> {
        let output = self
            .client
            .describe_stream()
            .stream_name(stream_name)
            .send()
            .await
            .map_err(|error| {
                BrokerError::request("DescribeStream", DisplayErrorContext(&error).to_string())
            })?;

        let description = output
            .stream_description()
            .ok_or_else(|| BrokerError::malformed("DescribeStream", "missing stream description"))?;

        Ok(StreamDescription {
            stream_name: description.stream_name().to_string(),
            shards: description
                .shards()
                .iter()
                .map(|shard| ShardDescription {
                    shard_id: shard.shard_id().to_string(),
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
        let mut call = self
            .client
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id)
            .shard_iterator_type(shard_iterator_type(request.position));

        match request.position {
            StartingPosition::AtSequenceNumber => {
                let sequence_number = request.sequence_number.as_deref().ok_or(
                    BrokerError::MissingStartingParameter {
                        position: request.position,
                        field: "startingSequenceNumber",
                    },
                )?;
                call = call.starting_sequence_number(sequence_number);
            }
            StartingPosition::AtTimestamp => {
                let timestamp =
                    request
                        .timestamp
                        .ok_or(BrokerError::MissingStartingParameter {
                            position: request.position,
                            field: "startingPositionTimestamp",
                        })?;
                call = call.timestamp(SmithyDateTime::from_millis(timestamp.timestamp_millis()));
            }
            StartingPosition::Latest | StartingPosition::TrimHorizon => {}
        }

        let output = call.send().await.map_err(|error| {
            BrokerError::request("GetShardIterator", DisplayErrorContext(&error).to_string())
        })?;

        output
            .shard_iterator()
            .map(ShardCursor::new)
            .ok_or_else(|| BrokerError::malformed("GetShardIterator", "missing shard iterator"))
    }

    async fn get_records(
        &self,
        cursor: &ShardCursor,
        limit: u32,
    ) -> Result<RecordPage, BrokerError> {
        let result = self
            .client
            .get_records()
            .shard_iterator(cursor.as_str())
            .limit(fetch_limit(limit))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|service| service.is_expired_iterator_exception()) =>
            {
                return Err(BrokerError::ExpiredCursor);
            }
            Err(error) => {
                return Err(BrokerError::request(
                    "GetRecords",
                    DisplayErrorContext(&error).to_string(),
                ));
            }
        };

        Ok(RecordPage {
            records: output.records().iter().map(raw_record).collect(),
            next_cursor: output.next_shard_iterator().map(ShardCursor::new),
        })
    }
}

fn shard_iterator_type(position: StartingPosition) -> ShardIteratorType {
    match position {
        StartingPosition::Latest => ShardIteratorType::Latest,
        StartingPosition::TrimHorizon => ShardIteratorType::TrimHorizon,
        StartingPosition::AtSequenceNumber => ShardIteratorType::AtSequenceNumber,
        StartingPosition::AtTimestamp => ShardIteratorType::AtTimestamp,
    }
}

fn raw_record(record: &Record) -> RawRecord {
    RawRecord {
        arrival_timestamp: record.approximate_arrival_timestamp().and_then(to_chrono),
        payload: record.data().as_ref().to_vec(),
        partition_key: record.partition_key().to_string(),
        sequence_number: record.sequence_number().to_string(),
    }
}

/// GetRecords rejects a `Limit` outside 1..=10000.
fn fetch_limit(limit: u32) -> i32 {
    i32::try_from(limit.clamp(1, MAX_BATCH_SIZE)).unwrap_or(i32::MAX)
}

fn to_chrono(timestamp: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}
