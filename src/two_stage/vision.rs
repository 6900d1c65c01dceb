//! Two-Stage Pipeline, Stage 2 — Vision (spec §4.8.3).
//!
//! One call per image job. Failure is absorbed into [`crate::model::VisionResult`]
//! rather than propagated — a single bad image must never fail the document
//! (ported from `two_stage_pipeline.py::vision_task`).

use crate::model::{ImageJob, VisionResult};
use crate::vision::VisionAdapter;
use std::path::Path;
use tracing::{info, instrument};

fn normalize_prompt(prompt: Option<&str>) -> Option<String> {
    prompt.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Run one vision completion. Never returns `Err` — a failure becomes a
/// [`VisionResult`] carrying the job's `base_text` as a fallback and the
/// error recorded for diagnostics (spec §4.8.3).
#[instrument(skip(adapter, job), fields(seq = job.seq))]
pub async fn run_vision_job(
    adapter: &VisionAdapter,
    job: &ImageJob,
    provider: Option<&str>,
    model: Option<&str>,
    prompt_override: Option<&str>,
) -> VisionResult {
    let prompt = normalize_prompt(prompt_override);
    match adapter
        .complete(Path::new(&job.image_path), &job.context_payload, prompt.as_deref(), provider, model)
        .await
    {
        Ok(vision_text) => VisionResult { seq: job.seq, vision_text, error: None },
        Err(err) => {
            info!(seq = job.seq, "vision call failed: {err}");
            VisionResult { seq: job.seq, vision_text: job.base_text.clone(), error: Some(err) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prompt_drops_blank_strings() {
        assert_eq!(normalize_prompt(Some("   ")), None);
        assert_eq!(normalize_prompt(Some(" hi ")), Some("hi".to_string()));
        assert_eq!(normalize_prompt(None), None);
    }
}
