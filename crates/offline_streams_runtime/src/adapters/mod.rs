pub mod broker;
pub mod kinesis;
pub mod launcher;
#[cfg(feature = "test-helpers")]
pub mod memory;
