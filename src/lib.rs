//! # docparse-orchestrator
//!
//! Orchestrate GPU-bound document parsing — PDF and office documents through
//! a native parser, with optional vision-model enrichment of figures — at
//! fleet scale, behind a bounded number of GPU-pinned worker processes.
//!
//! ## Why this crate?
//!
//! A single GPU-bound parser process can only hold one document's model
//! weights in VRAM at a time, and a native parser binding is never
//! thread-safe enough to share across requests. This crate pins one worker
//! process per configured GPU, enforces a hard per-pipeline timeout with
//! automatic worker respawn, and exposes two document pipelines on top of
//! that scheduler: a single-stage runner for simple jobs, and a three-stage
//! parse/vision/merge pipeline for documents whose figures need vision-model
//! descriptions without blocking the next document's parse.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ Parser Adapter   validate extension, pick backend, call external parser
//!  ├─ GPU Scheduler     route to the least-loaded GPU worker, enforce hard timeout
//!  ├─ Content Normalizer per-kind text rules, ordering, chunk typing
//!  ├─ Vision Adapter     (two-stage only) describe selected figures via a VLM
//!  └─ Object Store       (optional) persist chunks, pages, and assets to MinIO
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docparse_orchestrator::{runner::{RunnerRequest, SingleStageRunner}, OrchestratorConfig};
//! use std::sync::Arc;
//!
//! # async fn run(parser: Arc<dyn docparse_orchestrator::parser::ParserAdapter>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::builder().build()?;
//! let runner = SingleStageRunner::new(config, parser, None, None);
//! let result = runner.run(RunnerRequest {
//!     source_path: "document.pdf".into(),
//!     original_filename: "document.pdf".into(),
//!     chunk_type: false,
//!     return_txt: false,
//!     backend: None,
//!     pipeline: "ocr".into(),
//!     upload: None,
//! }).await?;
//! println!("{} chunks", result.result.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `orchestrator` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docparse-orchestrator = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod broker;
pub mod config;
pub mod error;
pub mod gpu_scheduler;
pub mod markdown;
pub mod model;
pub mod normalize;
pub mod object_store;
pub mod output;
pub mod parser;
pub mod runner;
pub mod two_stage;
pub mod vision;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use broker::{Broker, BrokerJob, InMemoryBroker, RedisBroker};
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use error::{OrchestratorError, VisionError};
pub use gpu_scheduler::{GpuScheduler, GpuSchedulerParserAdapter};
pub use model::{
    Chunk, ChunkType, ImageJob, MinioAssetRecord, ParsedItem, ParsedItemKind, Priority,
    SchedulerStatus, Task, TaskState, VisionResult,
};
pub use object_store::ObjectStore;
pub use output::ConversionResult;
pub use parser::{ParseOptions, ParseOutput, ParserAdapter};
pub use runner::{OfficeConverter, RunnerRequest, SingleStageRunner, UploadRequest};
pub use two_stage::{TwoStagePipeline, TwoStageRequest};
pub use vision::VisionAdapter;
