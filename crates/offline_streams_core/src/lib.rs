//! Shared domain primitives for the local stream emulator.
//!
//! This crate owns the service-definition contract, subscription resolution,
//! the record envelope handed to handlers, and the error taxonomy. It
//! intentionally excludes AWS SDK and async runtime concerns, which live in
//! `offline_streams_runtime`.

pub mod config;
pub mod envelope;
pub mod error;
pub mod log_sink;
pub mod stream;
pub mod subscription;
