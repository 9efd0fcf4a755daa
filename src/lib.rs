//! Declarative content synchronisation.
//!
//! A remote publishes a manifest of content units. A sync run turns the manifest
//! into declarative content, resolves it against what the local stores already
//! hold, downloads what is missing and publishes a new repository version.
//! See [`synchronise::Synchroniser`] for the entrypoint.

pub mod cli;
pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod load_config;
pub mod manifest;
pub mod model;
pub mod on_demand;
pub mod progress;
pub mod stages;
pub mod store;
pub mod synchronise;

pub use cli::{run, Cli, Commands};
pub use error::{Result, SyncError};
pub use synchronise::{SynchroniseReport, Synchroniser};
