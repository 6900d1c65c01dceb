//! Two-Stage Pipeline, Stage 3 — Merge (spec §4.8.4).
//!
//! Re-applies the Content Normalizer rules to every non-image item, and for
//! image items re-attaches the vision result by `seq`. Always deletes the
//! workspace and any extra cleanup paths, on every exit path (ported from
//! `two_stage_pipeline.py::_merge_content` / `merge_task`).

use crate::model::{Chunk, ChunkType, ParsedItem, ParsedItemKind, VisionResult};
use crate::normalize;
use crate::output::ConversionResult;
use crate::two_stage::parse::Stage1Result;
use std::collections::HashMap;
use tracing::{instrument, warn};

fn image_caption_text(item: &ParsedItem) -> String {
    crate::normalize::join_nonempty(item.img_caption.iter().cloned().chain(item.img_footnote.iter().cloned()))
}

/// Combine the image's own caption/footnote with its vision text (spec
/// §4.8.4 step 2): both present → `"{base}\nImage Description: {vision}"`;
/// only one present → that one; neither → no chunk.
fn combine_image_text(base_text: &str, vision_text: Option<&str>) -> Option<String> {
    let base = base_text.trim();
    let vision = vision_text.map(str::trim).unwrap_or("");
    let combined = match (base.is_empty(), vision.is_empty()) {
        (false, false) => format!("{base}\nImage Description: {vision}"),
        (false, true) => base.to_string(),
        (true, false) => vision.to_string(),
        (true, true) => return None,
    };
    let cleaned = normalize::sanitize_text(&combined);
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Merge vision results back into the annotated content list and build the
/// canonical chunk list (spec §4.8.4 steps 1–4).
pub fn merge_content(content_list: &[ParsedItem], vision_results: &[VisionResult], chunk_type: bool) -> Vec<Chunk> {
    let vision_by_seq: HashMap<u32, &str> = vision_results.iter().map(|r| (r.seq, r.vision_text.as_str())).collect();

    let mut chunks = Vec::with_capacity(content_list.len());
    for item in content_list {
        let page_number = item.page_idx + 1;
        let is_title = matches!(item.kind, ParsedItemKind::Text | ParsedItemKind::Equation) && item.text_level.is_some();

        if item.kind == ParsedItemKind::Image && item.img_path.as_deref().is_some_and(|p| !p.trim().is_empty()) {
            let Some(seq) = item.image_seq else { continue };
            let base_text = image_caption_text(item);
            let vision_text = vision_by_seq.get(&seq).copied();
            let Some(text) = combine_image_text(&base_text, vision_text) else { continue };
            chunks.push(Chunk {
                text,
                page_number,
                chunk_type: if chunk_type && is_title { Some(ChunkType::Title) } else { None },
            });
            continue;
        }

        if normalize::is_filtered(item, chunk_type) {
            continue;
        }

        let Some(text) = normalize::item_text(item) else { continue };
        let resolved_chunk_type = if matches!(item.kind, ParsedItemKind::Header | ParsedItemKind::Footer) {
            normalize::chunk_type_for(item, chunk_type)
        } else if chunk_type && is_title {
            Some(ChunkType::Title)
        } else {
            None
        };
        chunks.push(Chunk { text, page_number, chunk_type: resolved_chunk_type });
    }

    if chunk_type {
        normalize::sort_chunks(&mut chunks);
    }
    chunks
}

/// Run stage 3 end-to-end: merge, optionally build plain-text, then delete
/// the workspace and every cleanup path regardless of outcome (spec §4.8.4
/// steps 3–6).
#[instrument(skip(stage1, vision_results), fields(workspace = %stage1.workspace.display()))]
pub async fn run_merge_stage(stage1: Stage1Result, vision_results: Vec<VisionResult>) -> ConversionResult {
    let chunks = merge_content(&stage1.content_list, &vision_results, stage1.chunk_type);
    let txt = stage1.return_txt.then(|| normalize::to_plain_text(&chunks));

    cleanup_workspace(&stage1).await;

    ConversionResult { result: chunks, txt, minio_assets: None }
}

async fn cleanup_workspace(stage1: &Stage1Result) {
    if let Err(e) = tokio::fs::remove_dir_all(&stage1.workspace).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(workspace = %stage1.workspace.display(), "failed to remove workspace: {e}");
        }
    }
    if let Some(upload_workspace) = &stage1.upload_workspace {
        let _ = tokio::fs::remove_dir_all(upload_workspace).await;
    }
    for path in &stage1.extra_cleanup {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), "failed to remove cleanup path: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_item(kind: ParsedItemKind, page_idx: u32) -> ParsedItem {
        ParsedItem {
            kind,
            page_idx,
            text_level: None,
            text: None,
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

    #[test]
    fn combine_image_text_prefers_both_when_present() {
        let text = combine_image_text("Caption", Some("a cat")).unwrap();
        assert_eq!(text, "Caption\nImage Description: a cat");
    }

    #[test]
    fn combine_image_text_falls_back_to_whichever_is_present() {
        assert_eq!(combine_image_text("", Some("a cat")).unwrap(), "a cat");
        assert_eq!(combine_image_text("Caption", Some("")).unwrap(), "Caption");
        assert_eq!(combine_image_text("", Some("")), None);
    }

    #[test]
    fn merge_content_attaches_vision_text_by_seq() {
        let mut image = base_item(ParsedItemKind::Image, 0);
        image.img_path = Some("img1.png".into());
        image.image_seq = Some(1);
        let vision_results = vec![VisionResult { seq: 1, vision_text: "a chart".into(), error: None }];

        let chunks = merge_content(&[image], &vision_results, false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "a chart");
    }

    #[test]
    fn merge_content_drops_header_footer_without_chunk_type() {
        let mut header = base_item(ParsedItemKind::Header, 0);
        header.text = Some("Header".into());
        let chunks = merge_content(&[header], &[], false);
        assert!(chunks.is_empty());
    }

    #[test]
    fn merge_content_always_drops_page_number() {
        let mut page_number = base_item(ParsedItemKind::PageNumber, 0);
        page_number.text = Some("2".into());

        assert!(merge_content(&[page_number.clone()], &[], false).is_empty());
        assert!(merge_content(&[page_number], &[], true).is_empty());
    }

    #[test]
    fn merge_content_reorders_header_first_with_chunk_type() {
        let mut text = base_item(ParsedItemKind::Text, 0);
        text.text = Some("Body".into());
        let mut header = base_item(ParsedItemKind::Header, 0);
        header.text = Some("Header".into());
        let chunks = merge_content(&[text, header], &[], true);
        assert_eq!(chunks[0].text, "Header");
        assert_eq!(chunks[1].text, "Body");
    }
}
