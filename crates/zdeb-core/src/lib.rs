//! Core library for zdeb: mirrors upstream release bundles into a signed,
//! flat Debian repository held in an object store.

pub mod builder;
pub mod bundle;
pub mod catalog;
pub mod config;
pub mod deb;
pub mod deps;
pub mod error;
pub mod inventory;
pub mod metadata;
pub mod packager;
pub mod reporter;
pub mod retry;
pub mod signer;
pub mod store;
pub mod sync;
pub mod templates;
pub mod tool;

pub use config::Config;
pub use error::{BuildStage, Phase, RunError, SyncError};
pub use reporter::{ConsoleReporter, NullReporter, Reporter};
pub use sync::{Plan, RunReport, SyncComponents, Synchronizer};

/// User Agent string for upstream requests
pub const USER_AGENT: &str = concat!("zdeb/", env!("CARGO_PKG_VERSION"));
