//! Chat-completion inference over generated prompts.
//!
//! Requests are shaped per model family (see [`models`]), sent through a
//! [`ChatTransport`] with bounded retries, and persisted one file per sample
//! so interrupted runs resume where they stopped.

pub mod client;
pub mod driver;
pub mod models;

pub use client::{
    ChatRequest, ChatTransport, InferenceClient, OpenRouterTransport, RetriesExhausted, RetryPolicy,
};
pub use driver::{run_entries, run_inference, InferenceJob, InferenceSummary, ERROR_SENTINEL};
pub use models::{response_dir_name, ModelFamily, Reasoning};
