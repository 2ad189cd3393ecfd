use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use re2_prep::config::Config;
use re2_prep::inference::{run_inference, InferenceJob, RetryPolicy};
use re2_prep::pipeline::{run_prepare, PrepareOptions};
use re2_prep::prompt::Task;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "re2-prep",
    about = "Build loop/branch prediction prompts from execution traces and query models",
    version
)]
struct Cli {
    /// Config file (defaults to ~/.config/re2-prep/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Annotate sources and write one prompt per trace
    Prepare(PrepareArgs),
    /// Send prepared prompts to a model and save the responses
    Infer(InferArgs),
}

#[derive(Args, Debug)]
struct PrepareArgs {
    #[arg(long, value_enum)]
    task: Task,
    /// Difficulty split to process (repeatable; all splits when omitted)
    #[arg(long = "difficulty")]
    difficulties: Vec<String>,
    /// Regenerate prompts that already exist
    #[arg(long)]
    overwrite: bool,
    /// Leave source lines unnumbered
    #[arg(long)]
    no_line_numbers: bool,
}

#[derive(Args, Debug)]
struct InferArgs {
    /// OpenRouter model id, e.g. openai/gpt-5
    #[arg(long)]
    model: String,
    #[arg(long, value_enum)]
    task: Task,
    #[arg(long)]
    max_tokens: Option<u32>,
    #[arg(long)]
    reasoning: bool,
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long = "difficulty")]
    difficulties: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Prepare(args) => {
            let options = PrepareOptions {
                difficulties: args.difficulties,
                overwrite: args.overwrite,
                line_numbers: !args.no_line_numbers,
            };
            let summary = run_prepare(&config, args.task, &options)?;
            if summary.failed > 0 {
                tracing::warn!(failed = summary.failed, "Some samples were skipped");
            }
        }
        Commands::Infer(args) => {
            let mut policy = RetryPolicy::from(&config.inference);
            if let Some(max_retries) = args.max_retries {
                policy = policy.with_max_retries(max_retries);
            }
            let job = InferenceJob {
                model: args.model,
                task: args.task,
                max_tokens: args.max_tokens.unwrap_or(config.inference.max_tokens),
                reasoning: args.reasoning,
                difficulties: args.difficulties,
            };
            run_inference(&config, &job, policy).await?;
        }
    }

    Ok(())
}
