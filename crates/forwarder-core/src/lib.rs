//! # Forwarder Core
//!
//! Data model shared by the ingest forwarder crates: stream categories,
//! the stream registry, the ingest envelope codec and the settings table
//! the registry resolves against.

pub mod envelope;
pub mod error;
pub mod model;
pub mod registry;
pub mod settings;

pub use envelope::*;
pub use error::*;
pub use model::*;
pub use registry::*;
pub use settings::*;
