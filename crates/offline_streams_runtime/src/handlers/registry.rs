use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use offline_streams_core::envelope::StreamEvent;
use offline_streams_core::error::{HandlerError, ResolutionError};

use super::{HandlerResolver, StreamHandler};

/// In-process handlers registered by reference. Lookups always go to the
/// map, so re-registering a reference takes effect on the next batch.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn StreamHandler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut references: Vec<&String> = handlers.keys().collect();
        references.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &references)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reference: impl Into<String>, handler: Arc<dyn StreamHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.into(), handler);
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F, Fut>(&self, reference: impl Into<String>, handler: F)
    where
        F: Fn(StreamEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
    {
        self.register(reference, Arc::new(FnHandler(handler)));
    }

    pub fn unregister(&self, reference: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(reference)
            .is_some()
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(&self, reference: &str) -> Result<Arc<dyn StreamHandler>, ResolutionError> {
        if reference.is_empty() {
            return Err(ResolutionError::EmptyReference);
        }

        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
            .cloned()
            .ok_or_else(|| ResolutionError::NotRegistered {
                reference: reference.to_string(),
            })
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> StreamHandler for FnHandler<F>
where
    F: Fn(StreamEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    async fn invoke(&self, event: &StreamEvent) -> Result<serde_json::Value, HandlerError> {
        (self.0)(event.clone()).await
    }
}
