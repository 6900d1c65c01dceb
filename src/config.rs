//! Configuration for the orchestration core.
//!
//! All tunables are gathered in [`OrchestratorConfig`], built either via
//! [`OrchestratorConfig::from_env`] (reading the variables named in spec
//! §6) or via [`OrchestratorConfig::builder`] for explicit construction in
//! tests. Keeping every knob in one struct makes it trivial to share
//! configs across tasks, log them, and diff two runs.
//!
//! # Design choice: builder over constructor
//! A dozen-plus-field constructor is unreadable and breaks on every new
//! field. The builder pattern lets callers set only what they care about
//! and rely on documented defaults for the rest.

use crate::error::OrchestratorError;
use std::env;
use std::path::PathBuf;

/// Read a stripped environment override, falling back to `fallback` when
/// unset or blank. Mirrors `_env_override` in the original configuration
/// loader.
fn env_override(var_name: &str, fallback: Option<&str>) -> Option<String> {
    match env::var(var_name) {
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                fallback.map(str::to_string)
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => fallback.map(str::to_string),
    }
}

fn u64_from_env(var_name: &str, default: u64) -> u64 {
    env::var(var_name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn csv_from_env(var_name: &str, default: &[&str]) -> Vec<String> {
    match env::var(var_name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Per-pipeline hard timeout overrides for the GPU scheduler (spec §4.5).
#[derive(Debug, Clone)]
pub struct HardTimeouts {
    pub default_secs: u64,
    pub sci_secs: u64,
    pub images_secs: u64,
}

impl HardTimeouts {
    pub fn for_pipeline(&self, pipeline: &str) -> u64 {
        match pipeline {
            "sci" => self.sci_secs,
            "images" => self.images_secs,
            _ => self.default_secs,
        }
    }

    fn from_env() -> Self {
        let global = u64_from_env("MINERU_TASK_HARD_TIMEOUT_SECONDS", 600);
        Self {
            default_secs: u64_from_env("MINERU_DEFAULT_HARD_TIMEOUT_SECONDS", global),
            sci_secs: u64_from_env("MINERU_SCI_HARD_TIMEOUT_SECONDS", global),
            images_secs: u64_from_env("MINERU_IMAGES_HARD_TIMEOUT_SECONDS", global),
        }
    }
}

/// Broker queue names for the default priority pair and the two-stage triad,
/// each with an urgent counterpart (spec §4.6, §4.8.5).
#[derive(Debug, Clone)]
pub struct QueueNames {
    pub default_queue: String,
    pub normal_queue: String,
    pub urgent_queue: String,

    pub parse_queue: String,
    pub parse_urgent_queue: String,
    pub vision_queue: String,
    pub vision_urgent_queue: String,
    pub dispatch_queue: String,
    pub dispatch_urgent_queue: String,
    pub merge_queue: String,
    pub merge_urgent_queue: String,
}

impl QueueNames {
    pub fn single_stage(&self, priority: crate::model::Priority) -> &str {
        match priority {
            crate::model::Priority::Normal => &self.normal_queue,
            crate::model::Priority::Urgent => &self.urgent_queue,
        }
    }

    pub fn parse(&self, priority: crate::model::Priority) -> &str {
        match priority {
            crate::model::Priority::Normal => &self.parse_queue,
            crate::model::Priority::Urgent => &self.parse_urgent_queue,
        }
    }

    pub fn vision(&self, priority: crate::model::Priority) -> &str {
        match priority {
            crate::model::Priority::Normal => &self.vision_queue,
            crate::model::Priority::Urgent => &self.vision_urgent_queue,
        }
    }

    pub fn dispatch(&self, priority: crate::model::Priority) -> &str {
        match priority {
            crate::model::Priority::Normal => &self.dispatch_queue,
            crate::model::Priority::Urgent => &self.dispatch_urgent_queue,
        }
    }

    pub fn merge(&self, priority: crate::model::Priority) -> &str {
        match priority {
            crate::model::Priority::Normal => &self.merge_queue,
            crate::model::Priority::Urgent => &self.merge_urgent_queue,
        }
    }

    fn from_env() -> Self {
        Self {
            default_queue: env_override("CELERY_TASK_DEFAULT_QUEUE", Some("default")).unwrap(),
            normal_queue: env_override("CELERY_TASK_MINERU_QUEUE", Some("queue_normal")).unwrap(),
            urgent_queue: env_override("CELERY_TASK_URGENT_QUEUE", Some("queue_urgent")).unwrap(),
            parse_queue: env_override("CELERY_TASK_PARSE_QUEUE", Some("queue_parse")).unwrap(),
            parse_urgent_queue: env_override("CELERY_TASK_PARSE_QUEUE_URGENT", Some("queue_parse_urgent")).unwrap(),
            vision_queue: env_override("CELERY_TASK_VISION_QUEUE", Some("queue_vision")).unwrap(),
            vision_urgent_queue: env_override("CELERY_TASK_VISION_QUEUE_URGENT", Some("queue_vision_urgent")).unwrap(),
            dispatch_queue: env_override("CELERY_TASK_DISPATCH_QUEUE", Some("queue_dispatch")).unwrap(),
            dispatch_urgent_queue: env_override("CELERY_TASK_DISPATCH_QUEUE_URGENT", Some("queue_dispatch_urgent")).unwrap(),
            merge_queue: env_override("CELERY_TASK_MERGE_QUEUE", Some("queue_merge")).unwrap(),
            merge_urgent_queue: env_override("CELERY_TASK_MERGE_QUEUE_URGENT", Some("queue_merge_urgent")).unwrap(),
        }
    }
}

/// Top-level orchestration configuration (spec §6 "Configuration").
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// GPU ids for the scheduler's worker pool (`GPU_IDS`, default `["0"]`).
    pub gpu_ids: Vec<String>,
    pub hard_timeouts: HardTimeouts,

    pub default_backend: String,
    pub default_lang: Option<String>,
    pub default_method: Option<String>,

    pub vllm_server_urls: Vec<String>,
    pub vllm_api_key: Option<String>,
    pub vllm_auth_header: Option<String>,

    pub vision_provider: Option<String>,
    pub vision_model: Option<String>,
    pub vision_context_window: usize,
    pub vision_batch_size: usize,

    pub broker_url: String,
    pub result_backend_url: String,
    pub result_expires_secs: u64,
    pub queues: QueueNames,

    pub task_storage_dir: PathBuf,

    /// Rendering DPI for object-store page images (spec §4.3), and the
    /// JPEG quality used when encoding them. Defaults mirror the source
    /// rasteriser: 150 DPI, quality 90.
    pub dpi: u32,
    pub jpeg_quality: u8,
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder {
            config: Self::from_env(),
        }
    }

    /// Build a configuration entirely from the environment, per spec §6.
    pub fn from_env() -> Self {
        let default_storage = env::temp_dir().join("tiangong_mineru_tasks");
        let task_storage_dir = env_override("MINERU_TASK_STORAGE_DIR", None)
            .map(PathBuf::from)
            .unwrap_or(default_storage);

        let broker_url =
            env_override("CELERY_BROKER_URL", Some("redis://localhost:6379/0")).unwrap();
        let result_backend_url =
            env_override("CELERY_RESULT_BACKEND", Some(&broker_url)).unwrap();

        Self {
            gpu_ids: csv_from_env("GPU_IDS", &["0"]),
            hard_timeouts: HardTimeouts::from_env(),
            default_backend: env_override("MINERU_DEFAULT_BACKEND", Some("pipeline")).unwrap(),
            default_lang: env_override("MINERU_DEFAULT_LANG", None),
            default_method: env_override("MINERU_DEFAULT_METHOD", None),
            vllm_server_urls: {
                let multi = env_override("MINERU_VLLM_SERVER_URLS", None);
                match multi {
                    Some(list) => list.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
                    None => env_override("MINERU_VLLM_SERVER_URL", None)
                        .map(|u| vec![u])
                        .unwrap_or_default(),
                }
            },
            vllm_api_key: env_override("MINERU_VLLM_API_KEY", None),
            vllm_auth_header: env_override("MINERU_VLLM_AUTH_HEADER", None),
            vision_provider: env_override("VISION_PROVIDER", None),
            vision_model: env_override("VISION_MODEL", None),
            vision_context_window: u64_from_env("VISION_CONTEXT_WINDOW", 2) as usize,
            vision_batch_size: u64_from_env("VISION_BATCH_SIZE", 4) as usize,
            broker_url,
            result_backend_url,
            result_expires_secs: u64_from_env("CELERY_RESULT_EXPIRES", 3600),
            queues: QueueNames::from_env(),
            task_storage_dir,
            dpi: 150,
            jpeg_quality: 90,
        }
    }
}

/// Builder for [`OrchestratorConfig`], seeded from the environment and
/// overridable field-by-field (used heavily by tests).
#[derive(Debug)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn gpu_ids(mut self, ids: Vec<String>) -> Self {
        self.config.gpu_ids = ids;
        self
    }

    pub fn broker_url(mut self, url: impl Into<String>) -> Self {
        self.config.broker_url = url.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn task_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.task_storage_dir = dir.into();
        self
    }

    pub fn vision_context_window(mut self, n: usize) -> Self {
        self.config.vision_context_window = n;
        self
    }

    pub fn build(self) -> Result<OrchestratorConfig, OrchestratorError> {
        if self.config.gpu_ids.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "GPU_IDS must name at least one device".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Supported MinerU-style parser backends and their hybrid→vlm fallback map
/// (spec §4.1, grounded in `mineru_backend.py`).
pub const SUPPORTED_BACKENDS: &[&str] = &[
    "pipeline",
    "vlm-transformers",
    "vlm-sglang-engine",
    "vlm-sglang-client",
    "hybrid-sglang-engine",
    "hybrid-sglang-client",
];

pub fn backend_fallback(backend: &str) -> &str {
    match backend {
        "hybrid-sglang-engine" => "vlm-sglang-engine",
        "hybrid-sglang-client" => "vlm-sglang-client",
        other => other,
    }
}

pub fn normalize_backend(raw: &str) -> Result<String, OrchestratorError> {
    let lowered = raw.trim().to_lowercase();
    if SUPPORTED_BACKENDS.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(OrchestratorError::UnknownBackend {
            backend: raw.to_string(),
            supported: SUPPORTED_BACKENDS.join(", "),
        })
    }
}

pub fn resolve_backend(raw: &str) -> Result<String, OrchestratorError> {
    normalize_backend(raw).map(|b| backend_fallback(&b).to_string())
}

pub fn resolve_backend_from_env(config: &OrchestratorConfig) -> Result<String, OrchestratorError> {
    resolve_backend(&config.default_backend)
}

/// Accepted file extensions for the Single-Stage Runner (spec §4.7 step 1).
pub const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];
pub const OFFICE_EXTENSIONS: &[&str] = &["doc", "docx", "ppt", "pptx", "xls", "xlsx"];
pub const PARSER_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg"];

pub fn accepted_extensions() -> Vec<&'static str> {
    PARSER_EXTENSIONS
        .iter()
        .chain(OFFICE_EXTENSIONS.iter())
        .chain(MARKDOWN_EXTENSIONS.iter())
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_backend_rejects_unknown() {
        assert!(normalize_backend("not-a-backend").is_err());
    }

    #[test]
    fn normalize_backend_is_case_insensitive() {
        assert_eq!(normalize_backend("PIPELINE").unwrap(), "pipeline");
    }

    #[test]
    fn resolve_backend_maps_hybrid_to_vlm() {
        assert_eq!(
            resolve_backend("hybrid-sglang-engine").unwrap(),
            "vlm-sglang-engine"
        );
        assert_eq!(resolve_backend("pipeline").unwrap(), "pipeline");
    }

    #[test]
    fn env_override_falls_back_on_blank() {
        std::env::remove_var("DOCPARSE_TEST_VAR_XYZ");
        assert_eq!(
            env_override("DOCPARSE_TEST_VAR_XYZ", Some("fallback")),
            Some("fallback".to_string())
        );
    }
}
