//! Domain types shared by every Attractap crate.
//!
//! This crate holds the identifiers, card and reader models, protocol
//! constants and the collaborator traits the reader gateway consumes.
//! It has no runtime dependencies of its own; storage backends and the
//! gateway both build on top of it.

pub mod constants;
pub mod error;
pub mod services;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
