//! # Ingest Forwarder CLI Library
//!
//! Command definitions and wiring for the `ingest-forwarder` binary

pub mod commands;

pub use commands::*;
