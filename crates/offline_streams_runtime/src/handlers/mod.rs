//! Handler resolution: turning a handler reference such as
//! `src/consumer.handler` into something that can be invoked with a batch.

pub mod command;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use offline_streams_core::envelope::StreamEvent;
use offline_streams_core::error::{HandlerError, ResolutionError};

pub use command::CommandResolver;
pub use registry::HandlerRegistry;

#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn invoke(&self, event: &StreamEvent) -> Result<serde_json::Value, HandlerError>;
}

/// Resolves a handler reference. Callers resolve again for every batch;
/// implementations must not hand back a stale handler for a reference whose
/// target has changed.
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn StreamHandler>, ResolutionError>;
}
