//! Diagnostic sink handed to every component that reports user-visible
//! progress (skipped subscriptions, handler invocations, provisioning).
//!
//! Implementations must never fail or panic on a log call.

pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Sink that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _message: &str) {}
}

#[cfg(feature = "test-helpers")]
pub use recording::RecordingSink;

#[cfg(feature = "test-helpers")]
mod recording {
    use std::sync::Mutex;

    use super::LogSink;

    /// Sink that keeps every message for later assertions.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines
                .lock()
                .map(|lines| lines.clone())
                .unwrap_or_default()
        }

        pub fn count_containing(&self, needle: &str) -> usize {
            self.lines()
                .iter()
                .filter(|line| line.contains(needle))
                .count()
        }
    }

    impl LogSink for RecordingSink {
        fn log(&self, message: &str) {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push(message.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_act_as_sinks() {
        let captured = std::sync::Mutex::new(Vec::new());
        let sink = |message: &str| captured.lock().expect("poisoned mutex").push(message.to_string());

        sink.log("hello");

        assert_eq!(*captured.lock().expect("poisoned mutex"), vec!["hello"]);
    }

    #[test]
    fn recording_sink_counts_matching_lines() {
        let sink = RecordingSink::new();
        sink.log("fn-a - ignored");
        sink.log("fn-b - ignored");
        sink.log("Invoking handler 'x'");

        assert_eq!(sink.count_containing("ignored"), 2);
        assert_eq!(sink.lines().len(), 3);
    }
}
