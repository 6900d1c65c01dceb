//! Two-Stage Pipeline, Stage 1 — Parse (spec §4.8.1).
//!
//! Runs the Parser Adapter once, then builds the image-job list: each
//! candidate figure is filtered by size/aspect/duplicate/per-page-count
//! rules and given a stable `seq` plus a composed context payload. Ported
//! from `two_stage_pipeline.py::_build_image_jobs`; the context-window
//! helpers it imports from `mineru_with_images_service.py` are reconstructed
//! here from that module's own context-block walk (`get_prev_context` /
//! `get_next_context`), since the spec's §4.8.1 step 4 format
//! (`[Page P] [ChunkType=Title|Body] text`) supersedes the source's
//! "Context before:" / "Context after:" labels.

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::model::{ImageJob, ParsedItem, ParsedItemKind};
use crate::parser::{ParseOptions, ParserAdapter};
use md5::{Digest, Md5};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub const MIN_IMAGE_AREA_RATIO: f64 = 0.01;
pub const MIN_IMAGE_AREA_RATIO_WITH_CAPTION: f64 = 0.005;
pub const MAX_IMAGE_ASPECT_RATIO: f64 = 10.0;
pub const MIN_IMAGE_BYTES: u64 = 10 * 1024;
pub const MIN_IMAGE_BYTES_WITH_CAPTION: u64 = 2 * 1024;
pub const MIN_IMAGE_MIN_DIM: u32 = 96;
pub const MIN_IMAGE_PIXEL_AREA: u32 = MIN_IMAGE_MIN_DIM * MIN_IMAGE_MIN_DIM;
pub const PER_PAGE_IMAGE_LIMIT: u32 = 5;

/// Stage-1 result, kept on disk via `workspace` for stage 3 to clean up
/// (spec §4.8.1 step 5).
#[derive(Debug, Clone)]
pub struct Stage1Result {
    pub workspace: PathBuf,
    pub upload_workspace: Option<PathBuf>,
    pub extra_cleanup: Vec<PathBuf>,
    pub content_list: Vec<ParsedItem>,
    pub image_jobs: Vec<ImageJob>,
    pub chunk_type: bool,
    pub return_txt: bool,
}

#[derive(Debug, Clone)]
pub struct Stage1Request {
    pub source_path: PathBuf,
    pub backend: String,
    pub pipeline: String,
    pub chunk_type: bool,
    pub return_txt: bool,
    pub workspace: Option<PathBuf>,
    pub cleanup_source: bool,
    pub extra_cleanup: Vec<PathBuf>,
}

/// Ensure the task workspace exists, creating a fresh UUID-named directory
/// under `task_storage_dir` when the caller didn't pin one (spec §4.8.1 step 1).
pub async fn ensure_workspace(config: &OrchestratorConfig, existing: Option<&Path>) -> Result<PathBuf, OrchestratorError> {
    tokio::fs::create_dir_all(&config.task_storage_dir)
        .await
        .map_err(|e| OrchestratorError::Io { path: config.task_storage_dir.clone(), source: e })?;
    match existing {
        Some(path) => {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| OrchestratorError::Io { path: path.to_path_buf(), source: e })?;
            Ok(path.to_path_buf())
        }
        None => {
            let workspace = config.task_storage_dir.join(Uuid::new_v4().simple().to_string());
            tokio::fs::create_dir(&workspace)
                .await
                .map_err(|e| OrchestratorError::Io { path: workspace.clone(), source: e })?;
            Ok(workspace)
        }
    }
}

#[instrument(skip(config, parser, request), fields(pipeline = %request.pipeline))]
pub async fn run_parse_stage(
    config: &OrchestratorConfig,
    parser: &dyn ParserAdapter,
    request: Stage1Request,
) -> Result<Stage1Result, OrchestratorError> {
    let workspace = ensure_workspace(config, request.workspace.as_deref()).await?;
    let file_name = request
        .source_path
        .file_name()
        .ok_or_else(|| OrchestratorError::InvalidConfig("source path has no file name".into()))?;
    let target_path = workspace.join(file_name);
    if request.source_path != target_path {
        tokio::fs::copy(&request.source_path, &target_path)
            .await
            .map_err(|e| OrchestratorError::Io { path: target_path.clone(), source: e })?;
    }
    if request.cleanup_source {
        let _ = tokio::fs::remove_file(&request.source_path).await;
    }

    info!(target = %target_path.display(), "running two-stage parse");
    let parse_options = ParseOptions {
        backend: request.backend,
        pipeline: request.pipeline,
        lang: config.default_lang.clone(),
        method: config.default_method.clone(),
        start_page: None,
        end_page: None,
    };
    let parse_output = parser.parse(&target_path, &parse_options).await?;
    if parse_output.items.is_empty() {
        let file_size = tokio::fs::metadata(&target_path).await.map(|m| m.len()).unwrap_or(0);
        return Err(OrchestratorError::EmptyParseResult { path: target_path, file_size });
    }

    let mut content_list = parse_output.items;
    let image_jobs = build_image_jobs(&mut content_list, &parse_output.output_dir, config.vision_context_window).await;

    Ok(Stage1Result {
        workspace,
        upload_workspace: request.workspace,
        extra_cleanup: request.extra_cleanup,
        content_list,
        image_jobs,
        chunk_type: request.chunk_type,
        return_txt: request.return_txt,
    })
}

struct ContextBlock {
    content_index: usize,
    page_number: u32,
    is_title: bool,
    text: String,
}

/// Build the ordered list of context-eligible blocks: text/equation/table
/// body and image caption/footnote text, skipping anything blank (spec
/// §4.8.1 step 4, grounded in `mineru_with_images_service.py::mineru_service`'s
/// `context_blocks` construction).
fn build_context_blocks(content_list: &[ParsedItem]) -> Vec<ContextBlock> {
    let mut blocks = Vec::new();
    for (idx, item) in content_list.iter().enumerate() {
        let text = match item.kind {
            ParsedItemKind::Text | ParsedItemKind::Equation => item.text.clone().unwrap_or_default(),
            ParsedItemKind::Table => crate::normalize::join_nonempty([
                item.table_caption.join("\n"),
                item.table_body.clone().unwrap_or_default(),
                item.table_footnote.join("\n"),
            ]),
            ParsedItemKind::Image => image_caption_text(item),
            _ => continue,
        };
        if text.trim().is_empty() {
            continue;
        }
        blocks.push(ContextBlock {
            content_index: idx,
            page_number: item.page_idx + 1,
            is_title: item.text_level.is_some(),
            text,
        });
    }
    blocks
}

fn image_caption_text(item: &ParsedItem) -> String {
    crate::normalize::join_nonempty(item.img_caption.iter().cloned().chain(item.img_footnote.iter().cloned()))
}

fn format_context_block(block: &ContextBlock) -> String {
    let kind = if block.is_title { "Title" } else { "Body" };
    format!("[Page {}] [ChunkType={}] {}", block.page_number, kind, block.text)
}

/// Compose the N-before/N-after context window plus the image's own
/// caption/footnote into one payload string (spec §4.8.1 step 4).
///
/// `own_content_index` is the item's position in the original content list,
/// not an index into `blocks` — a bare image with no caption/footnote
/// contributes no entry to `blocks` at all, so its neighbors are found by
/// comparing content indices rather than by array position.
fn build_context_payload(blocks: &[ContextBlock], own_content_index: Option<usize>, own_text: &str, window: usize) -> String {
    let mut lines = Vec::new();
    if let Some(content_index) = own_content_index {
        let before_end = blocks.partition_point(|b| b.content_index < content_index);
        let after_start = blocks.partition_point(|b| b.content_index <= content_index);
        let before_start = before_end.saturating_sub(window);
        for block in &blocks[before_start..before_end] {
            lines.push(format_context_block(block));
        }
        for block in blocks.iter().skip(after_start).take(window) {
            lines.push(format_context_block(block));
        }
    }
    if !own_text.trim().is_empty() {
        lines.push(own_text.to_string());
    }
    lines.join("\n")
}

fn extract_bbox(item: &ParsedItem) -> Option<(f64, f64, f64, f64)> {
    item.bbox.map(|b| (b[0], b[1], b[2], b[3]))
}

fn page_size(item: &ParsedItem) -> Option<(f64, f64)> {
    item.page_size.filter(|p| p[0] > 0.0 && p[1] > 0.0).map(|p| (p[0], p[1]))
}

fn image_area_ratio(item: &ParsedItem) -> Option<f64> {
    let (x0, y0, x1, y1) = extract_bbox(item)?;
    let (pw, ph) = page_size(item)?;
    let area = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
    let page_area = pw * ph;
    if page_area <= 0.0 {
        None
    } else {
        Some(area / page_area)
    }
}

fn bbox_aspect_ratio(item: &ParsedItem) -> Option<f64> {
    let (x0, y0, x1, y1) = extract_bbox(item)?;
    let width = (x1 - x0).max(0.0);
    let height = (y1 - y0).max(0.0);
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let ratio = width / height;
    Some(if ratio >= 1.0 { ratio } else { 1.0 / ratio })
}

async fn file_size_and_md5(path: &Path) -> (u64, Option<String>) {
    let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    let hash = match tokio::fs::File::open(path).await {
        Ok(mut file) => {
            let mut hasher = Md5::new();
            let mut buf = [0u8; 8192];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => hasher.update(&buf[..n]),
                    Err(_) => return (size, None),
                }
            }
            Some(format!("{:x}", hasher.finalize()))
        }
        Err(_) => None,
    };
    (size, hash)
}

/// Filter and annotate the image-job list in document order (spec §4.8.1
/// step 3–4). Mutates `content_list[*].image_seq` in place so stage 3 can
/// re-locate the originating item by `seq`.
#[instrument(skip(content_list), fields(items = content_list.len()))]
async fn build_image_jobs(content_list: &mut [ParsedItem], output_dir: &Path, context_window: usize) -> Vec<ImageJob> {
    let blocks = build_context_blocks(content_list);

    let mut image_jobs = Vec::new();
    let mut seq: u32 = 1;
    let mut per_page_counts: HashMap<u32, u32> = HashMap::new();
    let mut seen_hashes: HashSet<String> = HashSet::new();

    for idx in 0..content_list.len() {
        let (kind, img_path_raw, page_number, has_caption, own_text, area_ratio, bbox_aspect) = {
            let item = &content_list[idx];
            if item.kind != ParsedItemKind::Image {
                continue;
            }
            let Some(img_path_raw) = item.img_path.clone().filter(|p| !p.trim().is_empty()) else { continue };
            (
                item.kind,
                img_path_raw,
                item.page_idx + 1,
                !item.img_caption.is_empty() || !item.img_footnote.is_empty(),
                image_caption_text(item),
                image_area_ratio(item),
                bbox_aspect_ratio(item),
            )
        };
        let _ = kind;

        let img_path = output_dir.join(&img_path_raw);
        if tokio::fs::metadata(&img_path).await.is_err() {
            debug!(path = %img_path.display(), page_number, "skipping missing image");
            continue;
        }

        let min_area_ratio = if has_caption { MIN_IMAGE_AREA_RATIO_WITH_CAPTION } else { MIN_IMAGE_AREA_RATIO };
        if let Some(ratio) = area_ratio {
            if ratio < min_area_ratio {
                debug!(ratio, min_area_ratio, "skip image: area too small");
                continue;
            }
        }
        if let Some(ratio) = bbox_aspect {
            if ratio > MAX_IMAGE_ASPECT_RATIO {
                debug!(ratio, "skip image: extreme bbox aspect ratio");
                continue;
            }
        }

        let dims = image::image_dimensions(&img_path).ok();
        if let Some((w, h)) = dims {
            let dim_aspect = if w >= h { w as f64 / h.max(1) as f64 } else { h as f64 / w.max(1) as f64 };
            if dim_aspect > MAX_IMAGE_ASPECT_RATIO {
                debug!(dim_aspect, "skip image: extreme intrinsic aspect ratio");
                continue;
            }
            if !has_caption {
                let min_side = w.min(h);
                if min_side < MIN_IMAGE_MIN_DIM || w.saturating_mul(h) < MIN_IMAGE_PIXEL_AREA {
                    debug!(min_side, "skip image: below minimum pixel dimensions");
                    continue;
                }
            }
        }

        let (file_size, file_hash) = file_size_and_md5(&img_path).await;
        let min_bytes = if has_caption { MIN_IMAGE_BYTES_WITH_CAPTION } else { MIN_IMAGE_BYTES };
        if file_size > 0 && file_size < min_bytes && !has_caption {
            debug!(file_size, min_bytes, "skip image: below minimum file size");
            continue;
        }
        if let Some(hash) = &file_hash {
            if seen_hashes.contains(hash) {
                debug!(hash, "skip image: duplicate content");
                continue;
            }
        }
        let page_count = per_page_counts.entry(page_number).or_insert(0);
        if *page_count >= PER_PAGE_IMAGE_LIMIT {
            debug!(page_number, "skip image: per-page limit reached");
            continue;
        }

        let context_payload = build_context_payload(&blocks, Some(idx), &own_text, context_window);

        content_list[idx].image_seq = Some(seq);
        image_jobs.push(ImageJob {
            seq,
            page_number,
            is_title: content_list[idx].text_level.is_some(),
            image_path: img_path.display().to_string(),
            context_payload,
            base_text: own_text,
        });

        seq += 1;
        *page_count += 1;
        if let Some(hash) = file_hash {
            seen_hashes.insert(hash);
        }
    }

    image_jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_item(page_idx: u32, bbox: Option<[f64; 4]>, page_size: Option<[f64; 2]>) -> ParsedItem {
        ParsedItem {
            kind: ParsedItemKind::Image,
            page_idx,
            text_level: None,
            text: None,
            img_caption: vec![],
            img_footnote: vec![],
            img_path: Some("img.png".into()),
            table_caption: vec![],
            table_body: None,
            table_footnote: vec![],
            list_items: vec![],
            bbox,
            page_size,
            image_seq: None,
        }
    }

    #[test]
    fn area_ratio_rejects_degenerate_page_size() {
        let item = image_item(0, Some([0.0, 0.0, 10.0, 10.0]), Some([0.0, 0.0]));
        assert_eq!(image_area_ratio(&item), None);
    }

    #[test]
    fn bbox_aspect_ratio_is_always_at_least_one() {
        let item = image_item(0, Some([0.0, 0.0, 5.0, 50.0]), None);
        assert_eq!(bbox_aspect_ratio(&item), Some(10.0));
    }

    #[test]
    fn context_payload_includes_own_text_even_without_blocks() {
        let payload = build_context_payload(&[], None, "a caption", 2);
        assert_eq!(payload, "a caption");
    }

    #[test]
    fn context_payload_formats_surrounding_blocks() {
        let blocks = vec![
            ContextBlock { content_index: 0, page_number: 1, is_title: true, text: "Intro".into() },
            ContextBlock { content_index: 2, page_number: 1, is_title: false, text: "After".into() },
        ];
        let payload = build_context_payload(&blocks, Some(1), "", 2);
        assert!(payload.contains("[Page 1] [ChunkType=Title] Intro"));
        assert!(payload.contains("[Page 1] [ChunkType=Body] After"));
    }

    fn text_item(page_idx: u32, text: &str) -> ParsedItem {
        ParsedItem {
            kind: ParsedItemKind::Text,
            page_idx,
            text_level: None,
            text: Some(text.into()),
            img_caption: vec![],
            img_footnote: vec![],
            img_path: None,
            table_caption: vec![],
            table_body: None,
            table_footnote: vec![],
            list_items: vec![],
            bbox: None,
            page_size: None,
            image_seq: None,
        }
    }

    #[tokio::test]
    async fn bare_image_without_caption_still_gets_neighbor_context() {
        let dir = tempfile::tempdir().unwrap();
        let img_path = dir.path().join("img.png");
        // Dimensions/format don't need to be a real PNG: `image::image_dimensions`
        // failing just skips the dimension checks below. Only the byte count
        // (must clear `MIN_IMAGE_BYTES`) and bbox/area ratios drive selection here.
        std::fs::write(&img_path, vec![0u8; 20 * 1024]).unwrap();

        let mut content_list = vec![
            text_item(0, "before"),
            image_item(0, Some([0.0, 0.0, 100.0, 100.0]), Some([200.0, 200.0])),
            text_item(0, "after"),
        ];

        let jobs = build_image_jobs(&mut content_list, dir.path(), 2).await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].context_payload.contains("before"), "payload: {}", jobs[0].context_payload);
        assert!(jobs[0].context_payload.contains("after"), "payload: {}", jobs[0].context_payload);
    }
}
