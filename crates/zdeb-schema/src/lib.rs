//! Shared domain types for zdeb: architectures, validated versions, resolved
//! releases and the canonical artifact naming scheme.
//!
//! Nothing in this crate performs I/O.

pub mod arch;
pub mod release;
pub mod version;

// Re-exports
pub use arch::*;
pub use release::*;
pub use version::*;
