//! Command-line interface for rorscrape.

mod commands;
pub mod progress;

pub use commands::{is_verbose, run};
