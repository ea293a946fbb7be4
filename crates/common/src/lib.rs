//! Shared error type and `.context()` helpers used across the wabridge crates.

pub mod error;

pub use error::{Context, Error, Result};
