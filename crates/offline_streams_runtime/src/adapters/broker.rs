use async_trait::async_trait;
use offline_streams_core::error::BrokerError;
use offline_streams_core::stream::{CursorRequest, RecordPage, ShardCursor, StreamDescription};

/// Request/response access to the stream broker. Shared by every poll loop,
/// so implementations must be safe for concurrent use.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn create_stream(&self, stream_name: &str, shard_count: u32) -> Result<(), BrokerError>;

    async fn describe_stream(&self, stream_name: &str) -> Result<StreamDescription, BrokerError>;

    async fn get_shard_cursor(
        &self,
        stream_name: &str,
        shard_id: &str,
        request: &CursorRequest,
    ) -> Result<ShardCursor, BrokerError>;

    async fn get_records(&self, cursor: &ShardCursor, limit: u32)
        -> Result<RecordPage, BrokerError>;
}
