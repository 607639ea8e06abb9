//! Output encodings for event batches.
//!
//! This module provides:
//! - The four wire formats written to standard output
//! - A tnetstring value model with suffix- and prefix-tagged dialects

pub mod format;
pub mod tnetstring;

pub use format::{OutputFormat, format_batch};
