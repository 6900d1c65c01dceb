//! Single-Stage Runner (spec §4.7): the end-to-end pipeline for one queued
//! job — preprocess, GPU parse, normalize, optional upload, always clean up.
//!
//! Grounded directly on `mineru_task_runner.py::run_mineru_local_job`,
//! translated step-for-step; validation failures map to [`OrchestratorError`]
//! variants the spec's §7 error table marks as `400`-class.

use crate::config::{self, OrchestratorConfig};
use crate::error::OrchestratorError;
use crate::markdown;
use crate::model::MinioAssetRecord;
use crate::normalize::{self, NormalizeOptions};
use crate::object_store::{self, ObjectStore};
use crate::output::ConversionResult;
use crate::parser::{ParseOptions, ParserAdapter};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{instrument, warn};

/// External collaborator that turns an office document into a PDF (spec §1
/// "pre-processing steps the core consumes"). Returns the converted file's
/// path plus any intermediate temp files that must join the cleanup set.
#[async_trait::async_trait]
pub trait OfficeConverter: Send + Sync {
    async fn convert_to_pdf(
        &self,
        source_path: &Path,
        extension: &str,
    ) -> Result<(PathBuf, Vec<PathBuf>), OrchestratorError>;
}

/// Object-store persistence request for one run.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub bucket: String,
    pub prefix: Option<String>,
    pub meta: Option<String>,
}

/// One job submitted to the runner (spec §4.7 inputs).
#[derive(Debug, Clone)]
pub struct RunnerRequest {
    pub source_path: PathBuf,
    pub original_filename: String,
    pub chunk_type: bool,
    pub return_txt: bool,
    pub backend: Option<String>,
    pub pipeline: String,
    pub upload: Option<UploadRequest>,
}

pub struct SingleStageRunner {
    config: OrchestratorConfig,
    parser: Arc<dyn ParserAdapter>,
    office_converter: Option<Arc<dyn OfficeConverter>>,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl SingleStageRunner {
    pub fn new(
        config: OrchestratorConfig,
        parser: Arc<dyn ParserAdapter>,
        office_converter: Option<Arc<dyn OfficeConverter>>,
        object_store: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self { config, parser, office_converter, object_store }
    }

    /// Run one job end-to-end, always cleaning up temp paths regardless of
    /// outcome (spec §4.7 step 8).
    #[instrument(skip(self, request), fields(filename = %request.original_filename))]
    pub async fn run(&self, request: RunnerRequest) -> Result<ConversionResult, OrchestratorError> {
        let filename = normalize_filename(&request.original_filename);
        let mut cleanup: HashSet<PathBuf> = HashSet::new();
        cleanup.insert(request.source_path.clone());

        let result = self.run_inner(&request, &filename, &mut cleanup).await;

        for path in &cleanup {
            match tokio::fs::remove_file(path).await {
                Ok(()) | Err(_) if !path.exists() => {}
                Err(e) => warn!(path = %path.display(), "failed to clean temp path: {e}"),
            }
        }
        result
    }

    async fn run_inner(
        &self,
        request: &RunnerRequest,
        filename: &str,
        cleanup: &mut HashSet<PathBuf>,
    ) -> Result<ConversionResult, OrchestratorError> {
        let extension = extract_extension(filename)?;
        validate_extension(&extension)?;

        if config::MARKDOWN_EXTENSIONS.contains(&extension.as_str()) {
            if request.upload.is_some() {
                return Err(OrchestratorError::InvalidConfig(
                    "object-store persistence is not supported for Markdown uploads".into(),
                ));
            }
            return self.run_markdown(&request.source_path, request.chunk_type, request.return_txt).await;
        }

        let mut processing_path = request.source_path.clone();
        if config::OFFICE_EXTENSIONS.contains(&extension.as_str()) {
            let converter = self.office_converter.as_ref().ok_or_else(|| {
                OrchestratorError::InvalidConfig("office conversion requested but no converter is configured".into())
            })?;
            let (converted_path, extra_cleanup) = converter.convert_to_pdf(&processing_path, &extension).await?;
            cleanup.extend(extra_cleanup);
            processing_path = converted_path;
        }

        let mut store_ctx: Option<(Arc<dyn ObjectStore>, String, String)> = None;
        if let Some(upload) = &request.upload {
            if !is_pdf(&processing_path) {
                return Err(OrchestratorError::NotAPdfForUpload { path: processing_path.clone() });
            }
            let store = self
                .object_store
                .clone()
                .ok_or_else(|| OrchestratorError::InvalidConfig("object-store persistence requested but no store is configured".into()))?;
            store.ensure_bucket(&upload.bucket).await?;
            let prefix = object_store::build_default_prefix(filename, upload.prefix.as_deref());
            let prefix = object_store::require_nonblank_prefix(&prefix)?.to_string();
            store_ctx = Some((store, upload.bucket.clone(), prefix));
        }

        let backend = config::resolve_backend(request.backend.as_deref().unwrap_or(&self.config.default_backend))?;
        let parse_options = ParseOptions {
            backend,
            pipeline: request.pipeline.clone(),
            lang: self.config.default_lang.clone(),
            method: self.config.default_method.clone(),
            start_page: None,
            end_page: None,
        };
        let parse_output = self.parser.parse(&processing_path, &parse_options).await?;
        if parse_output.items.is_empty() {
            let file_size = tokio::fs::metadata(&processing_path).await.map(|m| m.len()).unwrap_or(0);
            return Err(OrchestratorError::EmptyParseResult { path: processing_path, file_size });
        }

        let chunks = normalize::normalize(&parse_output.items, NormalizeOptions { chunk_type: request.chunk_type });
        let txt = request.return_txt.then(|| normalize::to_plain_text(&chunks));

        let minio_assets: Option<MinioAssetRecord> = match store_ctx {
            Some((store, bucket, prefix)) => {
                store.clear_prefix(&bucket, &prefix).await?;
                let mut record = object_store::upload_bundle(
                    store.as_ref(),
                    &bucket,
                    &prefix,
                    &processing_path,
                    &chunks,
                    self.config.dpi,
                    self.config.jpeg_quality,
                )
                .await?;
                if let Some(meta) = request.upload.as_ref().and_then(|u| u.meta.as_ref()) {
                    let meta_object = format!("{prefix}/meta.txt");
                    store.upload_bytes(&bucket, &meta_object, meta.clone().into_bytes(), "text/plain").await?;
                    record.meta_object = Some(meta_object);
                }
                Some(record)
            }
            None => None,
        };

        Ok(ConversionResult { result: chunks, txt, minio_assets })
    }

    async fn run_markdown(&self, path: &Path, chunk_type: bool, return_txt: bool) -> Result<ConversionResult, OrchestratorError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| OrchestratorError::Io { path: path.to_path_buf(), source: e })?;
        let chunks = markdown::parse_markdown_chunks(&content, chunk_type, 1);
        let txt = return_txt.then(|| normalize::to_plain_text(&chunks));
        Ok(ConversionResult { result: chunks, txt, minio_assets: None })
    }
}

fn normalize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if base.is_empty() { "upload".to_string() } else { base.to_string() }
}

fn extract_extension(filename: &str) -> Result<String, OrchestratorError> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| OrchestratorError::UnsupportedExtension {
            filename: filename.to_string(),
            extension: String::new(),
            accepted: config::accepted_extensions().join(", "),
        })
}

fn validate_extension(extension: &str) -> Result<(), OrchestratorError> {
    if config::accepted_extensions().contains(&extension) {
        Ok(())
    } else {
        Err(OrchestratorError::UnsupportedExtension {
            filename: String::new(),
            extension: extension.to_string(),
            accepted: config::accepted_extensions().join(", "),
        })
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("pdf")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_filename_strips_directories_and_defaults() {
        assert_eq!(normalize_filename("/tmp/uploads/report.pdf"), "report.pdf");
        assert_eq!(normalize_filename(""), "upload");
    }

    #[test]
    fn extract_extension_lowercases_and_rejects_missing() {
        assert_eq!(extract_extension("Report.PDF").unwrap(), "pdf");
        assert!(extract_extension("noext").is_err());
    }

    #[test]
    fn validate_extension_accepts_office_and_markdown() {
        assert!(validate_extension("docx").is_ok());
        assert!(validate_extension("md").is_ok());
        assert!(validate_extension("exe").is_err());
    }

    #[test]
    fn is_pdf_is_case_insensitive() {
        assert!(is_pdf(Path::new("a.PDF")));
        assert!(!is_pdf(Path::new("a.png")));
    }
}
