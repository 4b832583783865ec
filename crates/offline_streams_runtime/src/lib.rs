//! Async runtime integration for the local stream emulator.
//!
//! This crate owns broker access (the Kinesis adapter and the emulator
//! launcher), handler resolution, batch dispatch, the per-subscription shard
//! poll loop, and the startup orchestrator. Domain types come from
//! `offline_streams_core`.

pub mod adapters;
pub mod dispatch;
pub mod handlers;
pub mod logging;
pub mod orchestrator;
pub mod poller;
