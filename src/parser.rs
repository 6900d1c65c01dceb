//! Parser Adapter (spec §4.1): a uniform call into the external document
//! parser. The actual parsing engine is an external collaborator (spec §1);
//! this module owns backend validation, server-URL round-robin selection,
//! and the narrow trait real parser bindings implement.

use crate::config::{self, OrchestratorConfig};
use crate::error::OrchestratorError;
use crate::model::ParsedItem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// Options accepted by a single parse call (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub backend: String,
    pub pipeline: String,
    pub lang: Option<String>,
    pub method: Option<String>,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
}

/// Result of a parse call. A fixed-shape struct rather than a tuple —
/// resolves Open Question 1 (two-tuple vs three-tuple parser contracts in
/// the source) by making the contract unambiguous at the type level.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub items: Vec<ParsedItem>,
    pub output_dir: PathBuf,
    pub markdown: Option<String>,
}

/// Narrow interface the external parser library implements (spec §1: "the
/// parser library itself... pluggable adapters behind narrow interfaces").
#[async_trait::async_trait]
pub trait ParserAdapter: Send + Sync {
    async fn parse(
        &self,
        file_path: &Path,
        options: &ParseOptions,
    ) -> Result<ParseOutput, OrchestratorError>;
}

/// Process-wide round-robin over a list of remote VLM server URLs (spec
/// §4.1 "Server selection"). The cycle is rebuilt whenever the URL list
/// changes, mirroring the source's module-level cycle-rebuild behaviour
/// (spec §9 "Module-level round-robin state").
pub struct ServerUrlPool {
    urls: RwLock<Vec<String>>,
    next: AtomicUsize,
    rebuild_lock: Mutex<()>,
}

impl ServerUrlPool {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls: RwLock::new(urls),
            next: AtomicUsize::new(0),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Resolve the URL list in priority order: explicit argument > configured
    /// env list > single default.
    pub fn resolve(explicit: Option<Vec<String>>, config: &OrchestratorConfig, default: &str) -> Vec<String> {
        if let Some(urls) = explicit {
            if !urls.is_empty() {
                return urls;
            }
        }
        if !config.vllm_server_urls.is_empty() {
            return config.vllm_server_urls.clone();
        }
        vec![default.to_string()]
    }

    /// Replace the URL list if it differs, resetting the cycle position.
    pub fn set_urls(&self, urls: Vec<String>) {
        let _guard = self.rebuild_lock.lock().unwrap();
        let mut current = self.urls.write().unwrap();
        if *current != urls {
            *current = urls;
            self.next.store(0, Ordering::SeqCst);
        }
    }

    /// Return the next URL in round-robin order.
    pub fn next_url(&self) -> Option<String> {
        let urls = self.urls.read().unwrap();
        if urls.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::SeqCst) % urls.len();
        Some(urls[idx].clone())
    }
}

/// Build the auth header value from an explicit bearer token or a raw
/// header string (spec §4.1 "Server selection").
pub fn resolve_auth_header(bearer_token: Option<&str>, raw_header: Option<&str>) -> Option<String> {
    if let Some(token) = bearer_token {
        if !token.trim().is_empty() {
            return Some(format!("Bearer {token}"));
        }
    }
    raw_header
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Apply the page-windowing truncation described by spec §4.1 "Page windowing".
pub fn window_pages(total_pages: u32, start_page: Option<u32>, end_page: Option<u32>) -> (u32, u32) {
    let start = start_page.unwrap_or(1).max(1);
    let end = end_page.unwrap_or(total_pages).min(total_pages);
    (start, end.max(start.min(total_pages)))
}

/// Validate a requested backend and return it resolved through the
/// hybrid→vlm fallback table, failing fast before any I/O (spec §4.1).
pub fn validate_backend(raw: &str) -> Result<String, OrchestratorError> {
    config::resolve_backend(raw)
}

/// Wrap a parser-layer failure with the file size and target path so
/// callers can distinguish configuration from content problems (spec §4.1
/// "Failure modes").
pub fn wrap_parser_error(path: &Path, file_size: u64, detail: impl Into<String>) -> OrchestratorError {
    OrchestratorError::ParserCrashed {
        path: path.to_path_buf(),
        file_size,
        detail: detail.into(),
    }
}
