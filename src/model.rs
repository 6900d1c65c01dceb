//! Data model shared across the orchestration core (spec §3).
//!
//! Every type here is `Serialize`/`Deserialize` since instances cross the
//! broker boundary (payloads travel to/from worker processes as JSON) and,
//! for [`Chunk`], because it is the unit of the canonical result schema
//! (spec §6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The canonical output unit produced by the Content Normalizer.
///
/// Invariant: `text` is non-empty after trimming, contains no surrogate
/// code units, and is valid UTF-8 (enforced by [`crate::normalize`], never
/// by this type itself — `Chunk` is a plain data carrier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// 1-based page number.
    pub page_number: u32,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
}

/// Optional chunk role, set only when `chunk_type=true` is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Title,
    Header,
    Footer,
    PageNumber,
}

/// Raw parser output item (internal, spec §3 `ParsedItem`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedItem {
    pub kind: ParsedItemKind,
    /// 0-based page index as emitted by the parser.
    pub page_idx: u32,
    /// Non-null signals a heading; the value is typically the heading level.
    pub text_level: Option<u8>,
    pub text: Option<String>,
    pub img_caption: Vec<String>,
    pub img_footnote: Vec<String>,
    pub img_path: Option<String>,
    pub table_caption: Vec<String>,
    pub table_body: Option<String>,
    pub table_footnote: Vec<String>,
    pub list_items: Vec<String>,
    pub bbox: Option<[f64; 4]>,
    pub page_size: Option<[f64; 2]>,
    /// Assigned by the two-stage parse stage when this item is selected as
    /// an image job; absent for all other items and for single-stage runs.
    pub image_seq: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsedItemKind {
    Text,
    Equation,
    List,
    Image,
    Table,
    Header,
    Footer,
    PageNumber,
}

/// Two-stage-only descriptor for one figure selected for vision enrichment.
///
/// Invariant: `seq` is unique within a job and assigned in document order
/// (spec §3, §8 property 5 "Seq stability").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJob {
    pub seq: u32,
    pub page_number: u32,
    pub is_title: bool,
    pub image_path: String,
    pub context_payload: String,
    pub base_text: String,
}

/// Result of one dispatched vision completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionResult {
    pub seq: u32,
    pub vision_text: String,
    pub error: Option<crate::error::VisionError>,
}

/// Abstract task handle owned by the Task Queue (spec §3 `Task`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub state: TaskState,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
    Revoked,
}

/// Submission priority; selects one of two broker queue names (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
}

/// Record of an uploaded document bundle (spec §3 `MinioAssetRecord`).
///
/// Invariant: every listed object lives under `prefix/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinioAssetRecord {
    pub bucket: String,
    pub prefix: Option<String>,
    pub pdf_object: String,
    pub json_object: String,
    pub page_images: Vec<PageImageRef>,
    pub meta_object: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageImageRef {
    pub page_number: u32,
    pub object_name: String,
}

/// Metadata about a stored object, returned by `prepare_download`.
#[derive(Debug, Clone)]
pub struct MinioObjectInfo {
    pub object_name: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Internal scheduler record for one GPU worker (spec §3 `GPUExecutor`).
///
/// `pending_count` is mutated only while holding the scheduler's shared
/// mutex (see [`crate::gpu_scheduler::GpuScheduler`]); this struct itself
/// carries no synchronization.
#[derive(Debug)]
pub struct GpuExecutorStatus {
    pub gpu_id: String,
    pub pending: u32,
}

/// Status snapshot of the whole GPU scheduler.
#[derive(Debug, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub gpus: Vec<GpuStatusEntry>,
    pub total_pending: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GpuStatusEntry {
    pub gpu_id: String,
    pub pending: u32,
}

/// Dynamic, string-keyed provider/model metadata (spec §9 "Dynamic provider/model enum").
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub name: String,
    pub models: Vec<String>,
    pub default_model: String,
}

/// A registry of dynamically configured vision providers, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    pub providers: HashMap<String, ProviderSpec>,
    /// Declaration order, used for the provider fallback chain (spec §4.2).
    pub order: Vec<String>,
}

impl ProviderRegistry {
    pub fn get(&self, name: &str) -> Option<&ProviderSpec> {
        self.providers.get(name)
    }

    pub fn provider_for_model(&self, model: &str) -> Option<&str> {
        self.order.iter().find_map(|name| {
            let spec = self.providers.get(name)?;
            if spec.models.iter().any(|m| m == model) {
                Some(name.as_str())
            } else {
                None
            }
        })
    }
}
