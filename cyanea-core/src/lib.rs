//! Shared primitives, traits, and utilities for the Cyanea HMM engine.
//!
//! `cyanea-core` provides the foundation the other Cyanea crates build on:
//!
//! - **Error types** — [`CyaneaError`] and [`Result`] for structured error handling
//! - **Traits** — Core abstractions like [`Scored`] and [`Summarizable`]
//! - **Log-space probabilities** — [`LogProb`] with a finite floor for log(0)

pub mod error;
pub mod traits;
pub mod prob;

pub use error::{CyaneaError, OverflowLevel, Result};
pub use prob::LogProb;
pub use traits::*;
