//! Two-Stage Pipeline, Dispatch (spec §4.8.2): fan the parsed image jobs out
//! to vision, then fan them back in to merge.
//!
//! The source routes this through a Celery chord — a header of per-image
//! vision tasks plus a merge body, with the dispatch task replacing itself
//! with the chord rather than blocking on it. This crate has no worker
//! daemon of its own (spec §1 lists the HTTP surface and any out-of-process
//! worker loop as external collaborators), so `run_dispatch` is the
//! in-process equivalent: it runs every vision job concurrently and awaits
//! all of them before merging, which is observably the same fan-out/fan-in
//! shape without a broker round-trip. [`queue_dispatch`] is the other half —
//! it pushes the coarse-grained per-image vision jobs onto the broker's
//! vision queue so an out-of-process worker pool can pick them up instead,
//! for deployments that do run a separate worker loop over [`Broker`].

use crate::broker::{queue_for_stage, Broker, BrokerJob};
use crate::config::QueueNames;
use crate::error::OrchestratorError;
use crate::model::{ImageJob, Priority, VisionResult};
use crate::output::ConversionResult;
use crate::two_stage::merge::run_merge_stage;
use crate::two_stage::parse::Stage1Result;
use crate::two_stage::vision::run_vision_job;
use crate::vision::VisionAdapter;
use futures::future::join_all;
use tracing::instrument;

/// In-process fan-out/fan-in: if there are no image jobs, merge runs
/// directly on an empty vision result set (spec §4.8.2 "If `image_jobs` is
/// empty, chain directly to merge"). Otherwise every image job's vision call
/// runs concurrently and merge waits for all of them.
#[instrument(skip(stage1, adapter), fields(jobs = stage1.image_jobs.len()))]
pub async fn run_dispatch(
    stage1: Stage1Result,
    adapter: &VisionAdapter,
    provider: Option<&str>,
    model: Option<&str>,
    prompt_override: Option<&str>,
) -> ConversionResult {
    let vision_results: Vec<VisionResult> = if stage1.image_jobs.is_empty() {
        Vec::new()
    } else {
        join_all(
            stage1
                .image_jobs
                .iter()
                .map(|job| run_vision_job(adapter, job, provider, model, prompt_override)),
        )
        .await
    };

    run_merge_stage(stage1, vision_results).await
}

/// Push one vision job onto the broker's vision queue, for deployments where
/// a separate worker process (not this library) performs the completion and
/// eventually calls back into [`crate::two_stage::merge`].
pub async fn queue_vision_job(
    broker: &dyn Broker,
    queues: &QueueNames,
    job: &ImageJob,
    priority: Priority,
) -> Result<String, OrchestratorError> {
    let payload = serde_json::to_value(job)
        .map_err(|e| OrchestratorError::Internal(format!("failed to serialize image job: {e}")))?;
    let queue = queue_for_stage(queues, "vision", priority);
    broker.submit(&queue, BrokerJob { kind: "vision".into(), payload }).await
}

/// Queue every image job from a parsed stage 1 result, or return an empty
/// vec of task ids immediately when there is nothing to dispatch (spec
/// §4.8.2 "If `image_jobs` is empty, chain directly to merge" — here,
/// directly to the merge queue, left to the caller since merge needs the
/// full vision result set, not individual task ids).
#[instrument(skip(broker, queues, stage1), fields(jobs = stage1.image_jobs.len()))]
pub async fn queue_dispatch(
    broker: &dyn Broker,
    queues: &QueueNames,
    stage1: &Stage1Result,
    priority: Priority,
) -> Result<Vec<String>, OrchestratorError> {
    let mut task_ids = Vec::with_capacity(stage1.image_jobs.len());
    for job in &stage1.image_jobs {
        task_ids.push(queue_vision_job(broker, queues, job, priority).await?);
    }
    Ok(task_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::config::OrchestratorConfig;
    use crate::two_stage::parse::Stage1Result;
    use std::path::PathBuf;

    fn empty_stage1() -> Stage1Result {
        Stage1Result {
            workspace: PathBuf::from("/tmp/does-not-exist-dispatch-test"),
            upload_workspace: None,
            extra_cleanup: vec![],
            content_list: vec![],
            image_jobs: vec![],
            chunk_type: false,
            return_txt: false,
        }
    }

    #[tokio::test]
    async fn queue_dispatch_is_empty_for_no_image_jobs() {
        let broker = InMemoryBroker::default();
        let config = OrchestratorConfig::builder().build().unwrap();
        let stage1 = empty_stage1();
        let ids = queue_dispatch(&broker, &config.queues, &stage1, Priority::Normal).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn queue_dispatch_pushes_one_job_per_image() {
        let broker = InMemoryBroker::default();
        let config = OrchestratorConfig::builder().build().unwrap();
        let mut stage1 = empty_stage1();
        stage1.image_jobs.push(ImageJob {
            seq: 1,
            page_number: 1,
            is_title: false,
            image_path: "img1.png".into(),
            context_payload: String::new(),
            base_text: String::new(),
        });
        let ids = queue_dispatch(&broker, &config.queues, &stage1, Priority::Urgent).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(broker.status(&ids[0]).await.is_ok());
    }
}
