//! Batch inference over generated prompts.

use super::client::{ChatTransport, InferenceClient, OpenRouterTransport, RetryPolicy};
use super::models::response_dir_name;
use crate::config::{self, Config};
use crate::dataset::{self, Entry};
use crate::prompt::Task;
use crate::store::{ArtifactKey, ArtifactStore, DirStore};
use anyhow::{Context, Result};
use std::fs;
use std::time::Duration;

/// Written in place of a response when every attempt failed.
pub const ERROR_SENTINEL: &str = "Error";

#[derive(Debug, Clone)]
pub struct InferenceJob {
    pub model: String,
    pub task: Task,
    pub max_tokens: u32,
    pub reasoning: bool,
    /// Difficulty splits to process; all of them when empty
    pub difficulties: Vec<String>,
}

impl InferenceJob {
    pub fn response_dir(&self) -> String {
        response_dir_name(&self.model, self.reasoning)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferenceSummary {
    pub answered: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

/// Query the model for every prompt of `job.task`, resuming past samples
/// that already have a response on disk.
pub async fn run_inference(
    config: &Config,
    job: &InferenceJob,
    policy: RetryPolicy,
) -> Result<InferenceSummary> {
    let api_key = config::api_key()
        .context("No API key found. Set OPEN_ROUTER_KEY or OPENROUTER_API_KEY")?;
    let transport = OpenRouterTransport::new(
        &config.inference.base_url,
        api_key,
        Duration::from_secs(config.inference.timeout_secs),
    )?;
    let client = InferenceClient::new(transport, policy);

    let prompt_root = config.paths.prompts_root.join(job.task.prompt_dir());
    let entries = dataset::scan(&prompt_root, "txt", &job.difficulties)?;
    let mut store = DirStore::new(
        config
            .paths
            .results_root
            .join(job.task.prompt_dir())
            .join(job.response_dir()),
    );

    tracing::info!(
        model = %job.model,
        task = %job.task,
        prompts = entries.len(),
        output = %store.root().display(),
        "Starting inference"
    );
    let summary = run_entries(&client, job, &entries, &mut store).await;
    tracing::info!(
        model = %job.model,
        answered = summary.answered,
        skipped = summary.skipped_existing,
        failed = summary.failed,
        "Inference finished"
    );
    Ok(summary)
}

/// Store-agnostic loop behind [`run_inference`]. A sample whose key is
/// already in `store` is skipped without touching the transport.
pub async fn run_entries<T, S>(
    client: &InferenceClient<T>,
    job: &InferenceJob,
    entries: &[Entry],
    store: &mut S,
) -> InferenceSummary
where
    T: ChatTransport,
    S: ArtifactStore,
{
    let mut summary = InferenceSummary::default();

    for entry in entries {
        let key = ArtifactKey::new(&entry.difficulty, entry.id.clone());
        if store.contains(&key) {
            tracing::debug!(sample = %entry.id, "Response exists; skipping");
            summary.skipped_existing += 1;
            continue;
        }

        let prompt = match fs::read_to_string(&entry.path) {
            Ok(prompt) => prompt,
            Err(err) => {
                tracing::warn!(sample = %entry.id, path = %entry.path.display(), "Failed to read prompt: {err}");
                summary.failed += 1;
                continue;
            }
        };

        let (response, answered) = match client
            .send(&job.model, &prompt, job.max_tokens, job.reasoning)
            .await
        {
            Ok(text) => (text, true),
            Err(err) => {
                tracing::warn!(sample = %entry.id, difficulty = %entry.difficulty, "{err}");
                (ERROR_SENTINEL.to_string(), false)
            }
        };

        match store.write(&key, &response) {
            Ok(()) if answered => summary.answered += 1,
            Ok(()) => summary.failed += 1,
            Err(err) => {
                tracing::error!(sample = %entry.id, "Failed to save response: {err}");
                summary.failed += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::client::tests::ScriptedTransport;
    use crate::store::MemoryStore;
    use crate::trace::SampleId;
    use std::io;
    use tempfile::TempDir;

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    impl ArtifactStore for ReadOnlyStore {
        fn contains(&self, _key: &ArtifactKey) -> bool {
            false
        }

        fn write(&mut self, _key: &ArtifactKey, _contents: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    fn job() -> InferenceJob {
        InferenceJob {
            model: "openai/gpt-5".to_string(),
            task: Task::Loop,
            max_tokens: 128,
            reasoning: false,
            difficulties: Vec::new(),
        }
    }

    fn write_prompts(dir: &TempDir, ids: &[&str]) -> Vec<Entry> {
        let split = dir.path().join("easy");
        fs::create_dir_all(&split).unwrap();
        for id in ids {
            fs::write(split.join(format!("{id}.txt")), format!("prompt for {id}")).unwrap();
        }
        dataset::scan(dir.path(), "txt", &[]).unwrap()
    }

    #[tokio::test]
    async fn test_second_run_makes_no_requests() {
        let dir = TempDir::new().unwrap();
        let entries = write_prompts(&dir, &["HumanEval_1", "sample_7"]);
        let mut store = MemoryStore::default();

        let answers = vec![Ok(Some("a".to_string())), Ok(Some("b".to_string()))];
        let first = InferenceClient::new(ScriptedTransport::new(answers), RetryPolicy::immediate(5));
        let summary = run_entries(&first, &job(), &entries, &mut store).await;
        assert_eq!(summary.answered, 2);
        assert_eq!(first.transport().calls(), 2);

        let second = InferenceClient::new(ScriptedTransport::default(), RetryPolicy::immediate(5));
        let summary = run_entries(&second, &job(), &entries, &mut store).await;
        assert_eq!(summary.skipped_existing, 2);
        assert_eq!(second.transport().calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_sample_gets_sentinel_and_batch_continues() {
        let dir = TempDir::new().unwrap();
        let entries = write_prompts(&dir, &["a", "b"]);
        let mut store = MemoryStore::default();

        let script = vec![
            Err("boom".to_string()),
            Err("boom".to_string()),
            Ok(Some("answer".to_string())),
        ];
        let client = InferenceClient::new(ScriptedTransport::new(script), RetryPolicy::immediate(2));
        let summary = run_entries(&client, &job(), &entries, &mut store).await;

        assert_eq!(summary, InferenceSummary { answered: 1, skipped_existing: 0, failed: 1 });
        let key = |id: &str| ArtifactKey::new("easy", SampleId::new(id));
        assert_eq!(store.get(&key("a")), Some(ERROR_SENTINEL));
        assert_eq!(store.get(&key("b")), Some("answer"));
    }

    #[tokio::test]
    async fn test_responses_land_in_model_directory() {
        let dir = TempDir::new().unwrap();
        let entries = write_prompts(&dir, &["x"]);
        let results = TempDir::new().unwrap();
        let mut job = job();
        job.reasoning = true;
        let mut store = DirStore::new(results.path().join(job.response_dir()));

        let client = InferenceClient::new(
            ScriptedTransport::new(vec![Ok(Some("42".to_string()))]),
            RetryPolicy::immediate(1),
        );
        run_entries(&client, &job, &entries, &mut store).await;

        let written = results.path().join("gpt-5-reasoning/easy/x.txt");
        assert_eq!(fs::read_to_string(written).unwrap(), "42");
    }

    #[tokio::test]
    async fn test_unsaved_answer_counts_as_failed() {
        let dir = TempDir::new().unwrap();
        let entries = write_prompts(&dir, &["a"]);
        let client = InferenceClient::new(
            ScriptedTransport::new(vec![Ok(Some("answer".to_string()))]),
            RetryPolicy::immediate(1),
        );

        let summary = run_entries(&client, &job(), &entries, &mut ReadOnlyStore).await;
        assert_eq!(summary, InferenceSummary { answered: 0, skipped_existing: 0, failed: 1 });
        assert_eq!(client.transport().calls(), 1);
    }
}
