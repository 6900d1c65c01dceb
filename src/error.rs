//! Error types for the orchestration core.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OrchestratorError`] — **Fatal**: the task cannot proceed at all
//!   (bad extension, missing credentials, parser crash, hard timeout,
//!   broker unreachable). Returned as `Err(OrchestratorError)` and surfaced
//!   as a terminal `Task` state of `FAILURE`.
//!
//! * [`VisionError`] — **Non-fatal**: a single image's vision call failed
//!   but the rest of the document is fine. Stored inline on
//!   [`crate::model::VisionResult`] so the merge stage can fall back to the
//!   image's caption/footnote rather than losing the whole document.
//!
//! The separation mirrors spec §7: structural errors abort the task;
//! per-image vision failures are absorbed with a degraded output.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors produced by the orchestration core.
///
/// Per-image vision failures use [`VisionError`] and never reach here.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    // ── Validation errors (pre-dispatch, §7 "Validation") ──────────────────
    /// The submitted filename's extension is not in the accepted set.
    #[error("Unsupported file extension '{extension}' for '{filename}'. Accepted: {accepted}")]
    UnsupportedExtension {
        filename: String,
        extension: String,
        accepted: String,
    },

    /// An unrecognized parser backend name was requested.
    #[error("Unknown parser backend '{backend}'. Supported: {supported}")]
    UnknownBackend { backend: String, supported: String },

    /// Object-store persistence was requested with a blank prefix.
    #[error("Object-store prefix must not be empty when persistence is requested")]
    BlankPrefix,

    /// Object-store persistence was requested but the pre-processed path is not a PDF.
    #[error("Object-store persistence requires a PDF input, got '{path}'")]
    NotAPdfForUpload { path: PathBuf },

    /// A requested vision model does not belong to the resolved provider.
    #[error("Model '{model}' is not offered by provider '{provider}'. Supported: {supported}")]
    ModelProviderMismatch {
        provider: String,
        model: String,
        supported: String,
    },

    /// No vision provider could be resolved (no explicit choice, no env default, no credentials).
    #[error("No vision provider is configured; set VISION_PROVIDER or a provider API key")]
    NoProviderConfigured,

    // ── Parser errors (§7 "Parser hard timeout" / "Parser crash") ──────────
    /// The watchdog child did not return within the configured hard timeout.
    #[error("Parse hard timeout after {timeout_secs}s (pipeline={pipeline})")]
    HardTimeout { pipeline: String, timeout_secs: u64 },

    /// The watchdog child crashed or returned a non-zero/garbled result.
    #[error("Parser crashed on '{path}' ({file_size} bytes): {detail}")]
    ParserCrashed {
        path: PathBuf,
        file_size: u64,
        detail: String,
    },

    /// The parser returned no content; an empty result is always treated as fatal.
    #[error("Parser returned no content for '{path}' ({file_size} bytes)")]
    EmptyParseResult { path: PathBuf, file_size: u64 },

    /// The GPU scheduler's worker process is no longer reachable.
    #[error("GPU worker for device '{gpu_id}' is no longer reachable")]
    WorkerUnavailable { gpu_id: String },

    // ── Vision provider fallback exhaustion ─────────────────────────────────
    /// Every credentialed vision provider failed in turn.
    #[error("All vision providers failed; last error from '{last_provider}': {detail}")]
    AllProvidersFailed { last_provider: String, detail: String },

    // ── Object-store errors (§7 "Object-store failure") ─────────────────────
    /// The object store rejected an operation.
    #[error("Object-store operation failed: {0}")]
    ObjectStoreFailed(String),

    /// A requested object does not exist.
    #[error("Object '{object_name}' does not exist in bucket '{bucket}'")]
    ObjectNotFound { bucket: String, object_name: String },

    // ── Broker errors (§7 "Broker unreachable") ──────────────────────────────
    /// The task broker could not be reached for submit/status.
    #[error("Task broker unreachable: {0}")]
    BrokerUnreachable(String),

    /// No task exists with the given id.
    #[error("No task found with id '{0}'")]
    UnknownTask(String),

    // ── I/O / config ──────────────────────────────────────────────────────
    /// Filesystem operation failed outside of the tolerated cleanup path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder/config validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all (§7 "Unknown exception") ──────────────────────────────────
    /// Unexpected internal error; the workspace is still cleaned up before this propagates.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image's vision completion.
///
/// Stored inline on [`crate::model::VisionResult`]. The merge stage falls
/// back to the image's caption/footnote text when this is present; it never
/// aborts the document (spec §4.8.3, §7 "Vision failure").
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum VisionError {
    /// The vision provider call itself failed (network, API error, timeout).
    #[error("vision completion failed: {detail}")]
    CompletionFailed { detail: String },

    /// The image file referenced by the job could not be read.
    #[error("could not read image at '{path}': {detail}")]
    ImageUnreadable { path: String, detail: String },
}
