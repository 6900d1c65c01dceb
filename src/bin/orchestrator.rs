//! CLI binary for docparse-orchestrator.
//!
//! A thin local-testing shim: submit one document to the single-stage
//! runner (optionally the two-stage pipeline) and print the resulting
//! chunks or the GPU scheduler's status. Not a production worker daemon —
//! the HTTP surface and the out-of-process broker worker loop are external
//! collaborators (spec §1).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docparse_orchestrator::runner::{RunnerRequest, SingleStageRunner};
use docparse_orchestrator::two_stage::{TwoStagePipeline, TwoStageRequest};
use docparse_orchestrator::{GpuScheduler, GpuSchedulerParserAdapter, OrchestratorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orchestrator", about = "Submit a document to the GPU-bound parsing orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the single-stage pipeline on one local file.
    Run {
        path: PathBuf,
        #[arg(long)]
        backend: Option<String>,
        #[arg(long, default_value = "ocr")]
        pipeline: String,
        #[arg(long)]
        chunk_type: bool,
        #[arg(long)]
        txt: bool,
    },
    /// Run the two-stage parse/vision/merge pipeline on one local file.
    RunTwoStage {
        path: PathBuf,
        #[arg(long, default_value = "pipeline")]
        backend: String,
        #[arg(long, default_value = "ocr")]
        pipeline: String,
        #[arg(long)]
        chunk_type: bool,
        #[arg(long)]
        txt: bool,
        #[arg(long)]
        vision_provider: Option<String>,
        #[arg(long)]
        vision_model: Option<String>,
    },
    /// Print the GPU scheduler's current pending-count status.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = OrchestratorConfig::builder().build().context("failed to build configuration from environment")?;

    match cli.command {
        Command::Run { path, backend, pipeline, chunk_type, txt } => {
            let scheduler = GpuScheduler::new(&config).context("failed to start GPU scheduler")?;
            let parser = Arc::new(GpuSchedulerParserAdapter::new(scheduler));
            let runner = SingleStageRunner::new(config, parser, None, None);
            let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or("upload").to_string();
            let result = runner
                .run(RunnerRequest {
                    source_path: path,
                    original_filename: filename,
                    chunk_type,
                    return_txt: txt,
                    backend,
                    pipeline,
                    upload: None,
                })
                .await
                .context("run failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::RunTwoStage { path, backend, pipeline, chunk_type, txt, vision_provider, vision_model } => {
            let scheduler = GpuScheduler::new(&config).context("failed to start GPU scheduler")?;
            let parser = Arc::new(GpuSchedulerParserAdapter::new(scheduler));
            let two_stage = TwoStagePipeline::new(config, parser);
            let result = two_stage
                .run(TwoStageRequest {
                    source_path: path,
                    backend,
                    pipeline,
                    chunk_type,
                    return_txt: txt,
                    vision_provider,
                    vision_model,
                    vision_prompt: None,
                })
                .await
                .context("two-stage run failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Status => {
            let scheduler = GpuScheduler::new(&config).context("failed to start GPU scheduler")?;
            println!("{}", serde_json::to_string_pretty(&scheduler.status())?);
        }
    }

    Ok(())
}
