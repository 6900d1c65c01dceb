//! Object-Store Adapter (spec §4.3): bucket ensure, prefix clear, stream
//! upload, page-image rasterization, stream download. The actual store
//! (MinIO/S3-compatible) is an external collaborator (spec §1); this module
//! defines the narrow trait and the bundle-assembly logic that is the same
//! regardless of backend.

use crate::error::OrchestratorError;
use crate::model::{MinioAssetRecord, MinioObjectInfo, PageImageRef};
use futures::stream::BoxStream;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::Serialize;
use std::path::Path;

/// Narrow interface an object-store backend implements (spec §4.3).
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), OrchestratorError>;
    async fn clear_prefix(&self, bucket: &str, prefix: &str) -> Result<(), OrchestratorError>;
    async fn upload_bytes(
        &self,
        bucket: &str,
        object_name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), OrchestratorError>;
    async fn upload_file(
        &self,
        bucket: &str,
        object_name: &str,
        file_path: &Path,
        content_type: &str,
    ) -> Result<(), OrchestratorError>;
    async fn prepare_download(
        &self,
        bucket: &str,
        object_name: &str,
    ) -> Result<(BoxStream<'static, Result<Vec<u8>, OrchestratorError>>, MinioObjectInfo), OrchestratorError>;
}

/// Rasterise a PDF's pages to `(1-based page, RGB DynamicImage)` pairs at
/// the given DPI (spec §4.3, ported from the teacher's pdfium rasteriser).
pub fn render_pages_blocking(pdf_path: &Path, dpi: u32) -> Result<Vec<(u32, DynamicImage)>, OrchestratorError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| OrchestratorError::ObjectStoreFailed(format!("failed to open '{}': {e:?}", pdf_path.display())))?;

    let scale = dpi as f32 / 72.0;
    let pages = document.pages();
    let mut out = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let width = (page.width().value * scale) as i32;
        let height = (page.height().value * scale) as i32;
        let render_config = PdfRenderConfig::new().set_target_width(width).set_target_height(height);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| OrchestratorError::ObjectStoreFailed(format!("rasterisation failed: {e:?}")))?;
        let mut image = bitmap.as_image();
        if !matches!(image, DynamicImage::ImageRgb8(_)) {
            image = DynamicImage::ImageRgb8(image.to_rgb8());
        }
        out.push((idx as u32 + 1, image));
    }
    Ok(out)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, OrchestratorError> {
    let mut buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(image)
        .map_err(|e| OrchestratorError::ObjectStoreFailed(format!("jpeg encode failed: {e}")))?;
    Ok(buf)
}

/// Compact, UTF-8 JSON encoding of the chunk payload (spec §4.3 "parsed.json").
pub fn build_parsed_payload_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, OrchestratorError> {
    serde_json::to_vec(payload).map_err(|e| OrchestratorError::Internal(format!("failed to serialize parsed.json: {e}")))
}

/// Upload `prefix/source.pdf`, `prefix/parsed.json`, and
/// `prefix/pages/page_NNNN.jpg` for each rendered page (spec §4.3
/// "upload_bundle"). Invariant: every returned object name lives under
/// `prefix/`.
pub async fn upload_bundle<T: Serialize>(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    pdf_path: &Path,
    parsed_payload: &T,
    dpi: u32,
    jpeg_quality: u8,
) -> Result<MinioAssetRecord, OrchestratorError> {
    let normalized = prefix.trim_matches('/');
    let object_prefix = if normalized.is_empty() { String::new() } else { format!("{normalized}/") };

    let pdf_object = format!("{object_prefix}source.pdf");
    store.upload_file(bucket, &pdf_object, pdf_path, "application/pdf").await?;

    let json_object = format!("{object_prefix}parsed.json");
    let parsed_bytes = build_parsed_payload_json(parsed_payload)?;
    store.upload_bytes(bucket, &json_object, parsed_bytes, "application/json").await?;

    let pdf_path_owned = pdf_path.to_path_buf();
    let pages = tokio::task::spawn_blocking(move || render_pages_blocking(&pdf_path_owned, dpi))
        .await
        .map_err(|e| OrchestratorError::Internal(format!("rasterisation task panicked: {e}")))??;

    let mut page_images = Vec::with_capacity(pages.len());
    for (page_number, image) in pages {
        let jpeg_bytes = encode_jpeg(&image, jpeg_quality)?;
        let object_name = format!("{object_prefix}pages/page_{page_number:04}.jpg");
        store.upload_bytes(bucket, &object_name, jpeg_bytes, "image/jpeg").await?;
        page_images.push(PageImageRef { page_number, object_name });
    }

    Ok(MinioAssetRecord {
        bucket: bucket.to_string(),
        prefix: if normalized.is_empty() { None } else { Some(normalized.to_string()) },
        pdf_object,
        json_object,
        page_images,
        meta_object: None,
    })
}

/// Validate and normalize a prefix before clearing (spec §4.3 "Refuses an empty prefix").
pub fn require_nonblank_prefix(prefix: &str) -> Result<&str, OrchestratorError> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        Err(OrchestratorError::BlankPrefix)
    } else {
        Ok(trimmed)
    }
}

const ALLOWED_PREFIX_SPECIAL_CHARS: &[char] = &['/', '-', '.'];

/// Collapse a raw path component into a safe object-store prefix segment:
/// letters/digits pass through, everything else collapses to a single `_`,
/// edges are trimmed (spec §4.7 step 4, grounded in
/// `mineru_minio_utils.py::_normalize_prefix_component`).
fn sanitize_prefix_component(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ALLOWED_PREFIX_SPECIAL_CHARS.contains(&ch) {
            result.push(ch);
            continue;
        }
        if ch.is_alphanumeric() {
            result.push(ch);
            continue;
        }
        if result.ends_with('_') {
            continue;
        }
        result.push('_');
    }
    let collapsed_slashes = result.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/");
    collapsed_slashes.trim_matches(|c| c == '/' || c == '_').to_string()
}

/// Build the default upload prefix `mineru/<sanitized-basename>`, or
/// `<sanitized-custom-prefix>/<sanitized-basename>` when the caller supplied
/// one (spec §4.7 step 4).
pub fn build_default_prefix(filename: &str, custom_prefix: Option<&str>) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let base_clean = {
        let cleaned = sanitize_prefix_component(stem);
        if cleaned.is_empty() { "document".to_string() } else { cleaned }
    };
    if let Some(custom) = custom_prefix {
        let custom_clean = sanitize_prefix_component(custom);
        if !custom_clean.is_empty() {
            return format!("{custom_clean}/{base_clean}");
        }
    }
    format!("mineru/{base_clean}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Chunk;

    #[test]
    fn require_nonblank_prefix_rejects_empty() {
        assert!(require_nonblank_prefix("").is_err());
        assert!(require_nonblank_prefix("///").is_err());
        assert_eq!(require_nonblank_prefix("/docs/1/").unwrap(), "docs/1");
    }

    #[test]
    fn parsed_payload_json_is_compact_utf8() {
        let chunks = vec![Chunk { text: "hi".into(), page_number: 1, chunk_type: None }];
        let bytes = build_parsed_payload_json(&chunks).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains('\n'));
        assert!(text.contains("\"hi\""));
    }

    #[test]
    fn default_prefix_falls_back_to_mineru_root() {
        assert_eq!(build_default_prefix("My Report v2.pdf", None), "mineru/My_Report_v2");
    }

    #[test]
    fn default_prefix_uses_custom_prefix_when_given() {
        assert_eq!(
            build_default_prefix("report.pdf", Some("team one/docs")),
            "team_one/docs/report"
        );
    }

    #[test]
    fn default_prefix_never_empty_for_odd_filenames() {
        assert_eq!(build_default_prefix("###.pdf", None), "mineru/document");
    }
}
