use std::sync::Arc;

use offline_streams_core::envelope::StreamEvent;
use offline_streams_core::error::DispatchError;
use offline_streams_core::log_sink::LogSink;
use offline_streams_core::stream::RawRecord;
use tracing::debug;

use crate::handlers::HandlerResolver;

/// Hands one fetched batch to its handler as a single [`StreamEvent`].
#[derive(Clone)]
pub struct RecordDispatcher {
    resolver: Arc<dyn HandlerResolver>,
    sink: Arc<dyn LogSink>,
}

impl RecordDispatcher {
    pub fn new(resolver: Arc<dyn HandlerResolver>, sink: Arc<dyn LogSink>) -> Self {
        Self { resolver, sink }
    }

    /// Returns `Ok(None)` without touching the handler when `records` is
    /// empty. Otherwise the handler is resolved afresh and invoked exactly
    /// once with the whole batch; failures are returned, never retried.
    pub async fn dispatch(
        &self,
        records: &[RawRecord],
        handler_reference: &str,
    ) -> Result<Option<serde_json::Value>, DispatchError> {
        if records.is_empty() {
            return Ok(None);
        }

        let handler = self.resolver.resolve(handler_reference)?;
        self.sink
            .log(&format!("Invoking handler '{handler_reference}'"));

        let event = StreamEvent::from_records(records);
        debug!(
            handler = handler_reference,
            records = event.len(),
            first_sequence_number = %records[0].sequence_number,
            "dispatching batch"
        );

        handler
            .invoke(&event)
            .await
            .map(Some)
            .map_err(|source| DispatchError::Handler {
                handler: handler_reference.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use offline_streams_core::error::{HandlerError, ResolutionError};
    use offline_streams_core::log_sink::RecordingSink;
    use serde_json::json;

    use super::*;
    use crate::handlers::HandlerRegistry;

    fn hello_record() -> RawRecord {
        RawRecord {
            arrival_timestamp: None,
            payload: b"Hello!".to_vec(),
            partition_key: "1".to_string(),
            sequence_number: "1".to_string(),
        }
    }

    fn capturing_registry(
        reference: &str,
    ) -> (Arc<HandlerRegistry>, Arc<Mutex<Vec<serde_json::Value>>>) {
        let registry = Arc::new(HandlerRegistry::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&calls);
        registry.register_fn(reference, move |event: StreamEvent| {
            let captured = Arc::clone(&captured);
            async move {
                let value = serde_json::to_value(&event)
                    .map_err(|error| HandlerError::new(error.to_string()))?;
                captured.lock().expect("poisoned mutex").push(value);
                Ok::<_, HandlerError>(json!("ok"))
            }
        });
        (registry, calls)
    }

    #[tokio::test]
    async fn invokes_handler_once_with_whole_batch() {
        let (registry, calls) = capturing_registry("example.handler");
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = RecordDispatcher::new(registry, sink.clone());

        let result = dispatcher
            .dispatch(&[hello_record()], "example.handler")
            .await
            .expect("dispatch should succeed");

        assert_eq!(result, Some(json!("ok")));
        assert_eq!(
            *calls.lock().expect("poisoned mutex"),
            vec![json!({
                "records": [
                    {
                        "stream": {
                            "approximateArrivalTimestamp": null,
                            "data": "SGVsbG8h",
                            "partitionKey": "1",
                            "sequenceNumber": "1",
                        }
                    }
                ]
            })]
        );
        assert_eq!(sink.lines(), vec!["Invoking handler 'example.handler'"]);
    }

    #[tokio::test]
    async fn multi_record_batch_is_one_invocation() {
        let (registry, calls) = capturing_registry("batch.handler");
        let dispatcher = RecordDispatcher::new(registry, Arc::new(RecordingSink::new()));
        let records: Vec<RawRecord> = (1..=3)
            .map(|index| RawRecord {
                sequence_number: index.to_string(),
                ..hello_record()
            })
            .collect();

        dispatcher
            .dispatch(&records, "batch.handler")
            .await
            .expect("dispatch should succeed");

        let calls = calls.lock().expect("poisoned mutex");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["records"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn empty_batch_neither_invokes_nor_logs() {
        let (registry, calls) = capturing_registry("example.handler");
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = RecordDispatcher::new(registry, sink.clone());

        let result = dispatcher
            .dispatch(&[], "example.handler")
            .await
            .expect("empty dispatch should succeed");

        assert_eq!(result, None);
        assert!(calls.lock().expect("poisoned mutex").is_empty());
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn resolution_failure_propagates() {
        let dispatcher = RecordDispatcher::new(
            Arc::new(HandlerRegistry::new()),
            Arc::new(RecordingSink::new()),
        );

        let error = dispatcher
            .dispatch(&[hello_record()], "missing.handler")
            .await
            .expect_err("unknown handler should fail");

        assert_eq!(
            error,
            DispatchError::Resolution(ResolutionError::NotRegistered {
                reference: "missing.handler".to_string()
            })
        );
    }

    #[tokio::test]
    async fn handler_failure_propagates() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register_fn("failing.handler", |_| async {
            Err::<serde_json::Value, _>(HandlerError::new("boom"))
        });
        let dispatcher = RecordDispatcher::new(registry, Arc::new(RecordingSink::new()));

        let error = dispatcher
            .dispatch(&[hello_record()], "failing.handler")
            .await
            .expect_err("failing handler should fail");

        assert_eq!(error.to_string(), "handler 'failing.handler' failed: boom");
    }
}
