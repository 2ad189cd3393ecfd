//! re2-prep library crate
//!
//! Turns execution traces of Python methods into annotated prediction
//! prompts, and runs those prompts against chat-completion models.
//! Exposed as a library so benchmarks and tests can drive each stage
//! without going through the CLI.

pub mod annotate;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod locate;
pub mod pipeline;
pub mod prompt;
pub mod sanitize;
pub mod store;
pub mod trace;
