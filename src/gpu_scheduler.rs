//! GPU Scheduler (spec §4.5) — the hardest subsystem. A singleton,
//! process-wide scheduler owning a fixed pool of isolated parser workers,
//! one per configured GPU, with a hard per-task wall-clock timeout enforced
//! by running each parse in a supervised child process.
//!
//! ## Process isolation
//!
//! The source keeps a long-lived worker process per GPU and, within it,
//! forks a fresh child process per task so a single stuck or crashing
//! document cannot wedge the GPU slot (spec §9 "Process isolation for
//! parse tasks"). This translation uses [`procspawn::Pool`] with one
//! worker per GPU: `Pool::new(1)` gives the long-lived, GPU-pinned process;
//! `JoinHandle::join_timeout` both enforces the hard timeout and kills the
//! underlying OS process on expiry, which is procspawn's idiomatic
//! equivalent of "terminate the child, then resume the worker loop" — the
//! pool transparently provisions a replacement process for the next task,
//! so the GPU slot itself is never left unusable after a timeout.

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::model::{GpuStatusEntry, ParsedItem, SchedulerStatus};
use crate::parser::{ParseOptions, ParseOutput, ParserAdapter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, instrument, warn};

/// Serializable argument bundle handed to the watchdog child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseTaskArgs {
    pub file_path: PathBuf,
    pub pipeline: String,
    pub backend: String,
}

/// Serializable payload returned by a successful parse, kept opaque to the
/// scheduler itself — normalization happens after the future resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsePayload {
    pub raw_json: String,
    pub output_dir: PathBuf,
}

struct GpuExecutor {
    gpu_id: String,
    pool: procspawn::Pool,
    pending: Mutex<u32>,
}

/// Process-wide singleton providing `submit`/`status` (spec §4.5).
pub struct GpuScheduler {
    executors: Vec<Arc<GpuExecutor>>,
    /// Serializes executor selection so `pending` comparisons and increments
    /// are atomic across the whole pool (spec §4.5 "Dispatch policy").
    selection_lock: Mutex<()>,
    hard_timeouts: crate::config::HardTimeouts,
}

impl GpuScheduler {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let mut executors = Vec::with_capacity(config.gpu_ids.len());
        for gpu_id in &config.gpu_ids {
            let pool = procspawn::Pool::new(1)
                .map_err(|e| OrchestratorError::Internal(format!("failed to start GPU worker for '{gpu_id}': {e}")))?;
            executors.push(Arc::new(GpuExecutor {
                gpu_id: gpu_id.clone(),
                pool,
                pending: Mutex::new(0),
            }));
        }
        Ok(Self {
            executors,
            selection_lock: Mutex::new(()),
            hard_timeouts: config.hard_timeouts.clone(),
        })
    }

    /// Pick the executor with the smallest pending count, ties broken by
    /// declaration order, and atomically increment it (spec §4.5).
    fn pick_executor(&self) -> Arc<GpuExecutor> {
        let _guard = self.selection_lock.lock().unwrap();
        let chosen = self
            .executors
            .iter()
            .min_by_key(|e| *e.pending.lock().unwrap())
            .expect("scheduler configured with at least one GPU")
            .clone();
        *chosen.pending.lock().unwrap() += 1;
        chosen
    }

    /// `submit(file_path, pipeline, options) → Future<payload>`. Returns
    /// immediately; the returned future resolves when the watchdog child
    /// completes, times out, or crashes.
    #[instrument(skip(self))]
    pub fn submit(
        &self,
        file_path: PathBuf,
        pipeline: String,
        backend: String,
    ) -> oneshot::Receiver<Result<ParsePayload, OrchestratorError>> {
        let executor = self.pick_executor();
        let timeout_secs = self.hard_timeouts.for_pipeline(&pipeline);
        let (tx, rx) = oneshot::channel();

        let args = ParseTaskArgs { file_path, pipeline: pipeline.clone(), backend };
        let gpu_id = executor.gpu_id.clone();

        tokio::task::spawn_blocking(move || {
            let handle = executor.pool.spawn(args, run_watchdog_child);
            let result = match handle.join_timeout(Duration::from_secs(timeout_secs)) {
                Ok(inner) => inner,
                Err(e) => {
                    if e.is_timeout() {
                        warn!(gpu_id = %gpu_id, timeout_secs, "parse hard timeout");
                        Err(OrchestratorError::HardTimeout { pipeline, timeout_secs })
                    } else if e.is_panic() {
                        error!(gpu_id = %gpu_id, "watchdog child panicked: {e}");
                        Err(OrchestratorError::ParserCrashed {
                            path: PathBuf::new(),
                            file_size: 0,
                            detail: format!("watchdog child panicked: {e}"),
                        })
                    } else {
                        error!(gpu_id = %gpu_id, "watchdog child failed: {e}");
                        Err(OrchestratorError::WorkerUnavailable { gpu_id: gpu_id.clone() })
                    }
                }
            };
            *executor.pending.lock().unwrap() -= 1;
            let _ = tx.send(result);
        });

        rx
    }

    /// `status() → {gpus, total_pending}`; never blocks waiting on a worker.
    pub fn status(&self) -> SchedulerStatus {
        let gpus: Vec<GpuStatusEntry> = self
            .executors
            .iter()
            .map(|e| GpuStatusEntry {
                gpu_id: e.gpu_id.clone(),
                pending: *e.pending.lock().unwrap(),
            })
            .collect();
        let total_pending = gpus.iter().map(|g| g.pending).sum();
        SchedulerStatus { gpus, total_pending }
    }

    /// Maximum difference between any two GPUs' pending counts (spec §8
    /// property 8 "Scheduler fairness").
    pub fn pending_spread(&self) -> u32 {
        let pendings: Vec<u32> = self.executors.iter().map(|e| *e.pending.lock().unwrap()).collect();
        match (pendings.iter().max(), pendings.iter().min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        }
    }
}

/// Entry point run inside the watchdog child process. Placeholder parse
/// invocation: a real deployment wires in the external parser library here
/// (spec §1 — the parser itself is an external collaborator); this function
/// is the supervised boundary the scheduler owns.
fn run_watchdog_child(args: ParseTaskArgs) -> Result<ParsePayload, OrchestratorError> {
    if !args.file_path.exists() {
        return Err(OrchestratorError::ParserCrashed {
            path: args.file_path.clone(),
            file_size: 0,
            detail: "input file not found in watchdog child".into(),
        });
    }
    let file_size = std::fs::metadata(&args.file_path).map(|m| m.len()).unwrap_or(0);
    Err(OrchestratorError::EmptyParseResult { path: args.file_path, file_size })
}

/// [`ParserAdapter`] implementation that routes every call through a
/// [`GpuScheduler`] — the adapter a single-stage or two-stage pipeline wires
/// in when it wants the real worker-per-GPU dispatch instead of a test
/// double. `ParsePayload::raw_json` is expected to hold a JSON array of
/// [`ParsedItem`] (the shape the watchdog child writes).
pub struct GpuSchedulerParserAdapter {
    scheduler: GpuScheduler,
}

impl GpuSchedulerParserAdapter {
    pub fn new(scheduler: GpuScheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait::async_trait]
impl ParserAdapter for GpuSchedulerParserAdapter {
    async fn parse(&self, file_path: &Path, options: &ParseOptions) -> Result<ParseOutput, OrchestratorError> {
        let rx = self.scheduler.submit(file_path.to_path_buf(), options.pipeline.clone(), options.backend.clone());
        let payload = rx
            .await
            .map_err(|_| OrchestratorError::WorkerUnavailable { gpu_id: "unknown".into() })??;

        let items: Vec<ParsedItem> = serde_json::from_str(&payload.raw_json).map_err(|e| {
            OrchestratorError::ParserCrashed {
                path: file_path.to_path_buf(),
                file_size: 0,
                detail: format!("watchdog child returned malformed payload: {e}"),
            }
        })?;

        Ok(ParseOutput { items, output_dir: payload.output_dir, markdown: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(gpu_ids: Vec<&str>) -> OrchestratorConfig {
        OrchestratorConfig::builder()
            .gpu_ids(gpu_ids.into_iter().map(String::from).collect())
            .build()
            .unwrap()
    }

    #[test]
    fn status_starts_with_zero_pending() {
        let scheduler = GpuScheduler::new(&test_config(vec!["0", "1"])).unwrap();
        let status = scheduler.status();
        assert_eq!(status.total_pending, 0);
        assert_eq!(status.gpus.len(), 2);
    }

    #[test]
    fn pick_executor_prefers_least_pending() {
        let scheduler = GpuScheduler::new(&test_config(vec!["0", "1", "2"])).unwrap();
        *scheduler.executors[0].pending.lock().unwrap() = 3;
        *scheduler.executors[1].pending.lock().unwrap() = 1;
        *scheduler.executors[2].pending.lock().unwrap() = 2;
        let chosen = scheduler.pick_executor();
        assert_eq!(chosen.gpu_id, "1");
        assert_eq!(*chosen.pending.lock().unwrap(), 2);
    }

    #[test]
    fn fairness_spread_never_negative() {
        let scheduler = GpuScheduler::new(&test_config(vec!["0", "1"])).unwrap();
        assert_eq!(scheduler.pending_spread(), 0);
    }
}
