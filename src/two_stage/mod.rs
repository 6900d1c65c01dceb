//! Two-Stage Pipeline (spec §4.8): parse → dispatch → vision → merge, split
//! across stages so a slow vision call never blocks parsing the next
//! document and a crashed GPU worker never loses pages already parsed.
//!
//! [`TwoStagePipeline`] is the in-process convenience entry point — it runs
//! all three stages end-to-end and returns the canonical result directly,
//! the shape a caller without its own out-of-process worker loop wants. The
//! stage modules themselves ([`parse`], [`dispatch`], [`vision`], [`merge`])
//! are the decomposition a real worker pool would drive independently,
//! routed through [`crate::broker::Broker`] and [`crate::config::QueueNames`].

pub mod dispatch;
pub mod merge;
pub mod parse;
pub mod vision;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::output::ConversionResult;
use crate::parser::ParserAdapter;
use crate::vision::VisionAdapter;
use dispatch::run_dispatch;
use parse::{run_parse_stage, Stage1Request};
use std::sync::Arc;
use tracing::instrument;

/// One job submitted to the two-stage pipeline (spec §4.8 inputs — the same
/// shape as [`crate::runner::RunnerRequest`] minus upload, since the source's
/// two-stage tasks never persist to the object store themselves).
#[derive(Debug, Clone)]
pub struct TwoStageRequest {
    pub source_path: std::path::PathBuf,
    pub backend: String,
    pub pipeline: String,
    pub chunk_type: bool,
    pub return_txt: bool,
    pub vision_provider: Option<String>,
    pub vision_model: Option<String>,
    pub vision_prompt: Option<String>,
}

pub struct TwoStagePipeline {
    config: OrchestratorConfig,
    parser: Arc<dyn ParserAdapter>,
    vision_adapter: VisionAdapter,
}

impl TwoStagePipeline {
    pub fn new(config: OrchestratorConfig, parser: Arc<dyn ParserAdapter>) -> Self {
        let vision_adapter = VisionAdapter::from_config(&config);
        Self { config, parser, vision_adapter }
    }

    /// Run all three stages end-to-end in-process (spec §4.8.1-§4.8.4).
    #[instrument(skip(self, request), fields(source = %request.source_path.display()))]
    pub async fn run(&self, request: TwoStageRequest) -> Result<ConversionResult, OrchestratorError> {
        let stage1 = run_parse_stage(
            &self.config,
            self.parser.as_ref(),
            Stage1Request {
                source_path: request.source_path,
                backend: request.backend,
                pipeline: request.pipeline,
                chunk_type: request.chunk_type,
                return_txt: request.return_txt,
                workspace: None,
                cleanup_source: false,
                extra_cleanup: Vec::new(),
            },
        )
        .await?;

        let result = run_dispatch(
            stage1,
            &self.vision_adapter,
            request.vision_provider.as_deref(),
            request.vision_model.as_deref(),
            request.vision_prompt.as_deref(),
        )
        .await;

        Ok(result)
    }
}
