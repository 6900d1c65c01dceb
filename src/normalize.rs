//! Content Normalizer (spec §4.4): a pure function turning parser output
//! into the canonical chunk list, independent of which pipeline variant
//! (single-stage or two-stage) produced the items.

use crate::model::{Chunk, ChunkType, ParsedItem, ParsedItemKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    pub chunk_type: bool,
}

/// Strip leading/trailing whitespace, drop surrogate code units, then
/// re-encode as UTF-8 dropping any remaining invalid sequences.
///
/// Surrogates cannot occur in a valid Rust `&str`, but parser payloads
/// arrive from JSON/FFI sources where a lossy decode upstream can have
/// substituted `U+FFFD` in place of them; the replacement character is
/// itself valid UTF-8 and is left in place, matching the source's
/// `encode("utf-8", "ignore")` behaviour for genuinely invalid bytes.
pub fn sanitize_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let filtered: String = trimmed
        .chars()
        .filter(|c| !(0xD800_u32..=0xDFFF_u32).contains(&(*c as u32)))
        .collect();
    String::from_utf8(filtered.into_bytes()).unwrap_or_default()
}

pub(crate) fn join_nonempty(parts: impl IntoIterator<Item = String>) -> String {
    parts
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Map one parsed item to its chunk text, per spec §4.4's per-kind rules.
/// Returns `None` when the item carries no text (e.g. a bare image with
/// only a path, deferred to the vision stage in two-stage mode).
pub(crate) fn item_text(item: &ParsedItem) -> Option<String> {
    let text = match item.kind {
        ParsedItemKind::Text | ParsedItemKind::Equation => item.text.clone().unwrap_or_default(),
        ParsedItemKind::List => {
            if !item.list_items.is_empty() {
                item.list_items.join("\n")
            } else {
                item.text.clone().unwrap_or_default()
            }
        }
        ParsedItemKind::Table => join_nonempty([
            item.table_caption.join("\n"),
            item.table_body.clone().unwrap_or_default(),
            item.table_footnote.join("\n"),
        ]),
        ParsedItemKind::Image => join_nonempty(
            item.img_caption
                .iter()
                .cloned()
                .chain(item.img_footnote.iter().cloned()),
        ),
        ParsedItemKind::Header | ParsedItemKind::Footer | ParsedItemKind::PageNumber => {
            item.text.clone().unwrap_or_default()
        }
    };

    let cleaned = sanitize_text(&text);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub(crate) fn chunk_type_for(item: &ParsedItem, chunk_type: bool) -> Option<ChunkType> {
    if !chunk_type {
        return None;
    }
    match item.kind {
        ParsedItemKind::Header => Some(ChunkType::Header),
        ParsedItemKind::Footer => Some(ChunkType::Footer),
        ParsedItemKind::PageNumber => Some(ChunkType::PageNumber),
        ParsedItemKind::Text | ParsedItemKind::Equation if item.text_level.is_some() => {
            Some(ChunkType::Title)
        }
        _ => None,
    }
}

/// Should this item be dropped outright regardless of whether it has text?
pub(crate) fn is_filtered(item: &ParsedItem, chunk_type: bool) -> bool {
    match item.kind {
        ParsedItemKind::PageNumber => true,
        ParsedItemKind::Header | ParsedItemKind::Footer => !chunk_type,
        _ => false,
    }
}

/// Turn parser items into canonical chunks (spec §4.4).
pub fn normalize(items: &[ParsedItem], options: NormalizeOptions) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::with_capacity(items.len());

    for item in items {
        if is_filtered(item, options.chunk_type) {
            continue;
        }
        // Bare images with only a path (no caption/footnote text) are
        // deferred to the vision stage in two-stage mode and contribute no
        // chunk at the normalization step.
        let Some(text) = item_text(item) else {
            continue;
        };
        chunks.push(Chunk {
            text,
            page_number: item.page_idx + 1,
            chunk_type: chunk_type_for(item, options.chunk_type),
        });
    }

    if options.chunk_type {
        sort_chunks(&mut chunks);
    }

    chunks
}

/// Stable-sort so header-typed chunks float to the top, preserving document
/// order within each bucket (spec §4.4 "Ordering", §8 property 3).
pub fn sort_chunks(chunks: &mut [Chunk]) {
    chunks.sort_by_key(|c| if c.chunk_type == Some(ChunkType::Header) { 0 } else { 1 });
}

/// Concatenate chunk texts for plain-text export (spec §4.4 "Plain-text export").
pub fn to_plain_text(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(&chunk.text);
        if chunk.chunk_type == Some(ChunkType::Title) {
            out.push_str("\n\n");
        } else {
            out.push('\n');
        }
    }
    out.trim_end_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_item(kind: ParsedItemKind, text: &str, page_idx: u32, text_level: Option<u8>) -> ParsedItem {
        ParsedItem {
            kind,
            page_idx,
            text_level,
            text: Some(text.to_string()),
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

    // S1 is covered by markdown.rs since it bypasses the parser entirely.

    #[test]
    fn s2_default_filtering_drops_header_footer_page_number() {
        let items = vec![
            text_item(ParsedItemKind::Text, "A", 0, None),
            text_item(ParsedItemKind::Header, "H", 0, None),
            text_item(ParsedItemKind::Text, "B", 1, None),
            text_item(ParsedItemKind::PageNumber, "2", 1, None),
        ];
        let chunks = normalize(&items, NormalizeOptions { chunk_type: false });
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "A");
        assert_eq!(chunks[0].page_number, 1);
        assert_eq!(chunks[1].text, "B");
        assert_eq!(chunks[1].page_number, 2);
    }

    #[test]
    fn s3_chunk_type_reorders_header_to_front() {
        let items = vec![
            text_item(ParsedItemKind::Text, "A", 0, None),
            text_item(ParsedItemKind::Header, "H", 0, None),
            text_item(ParsedItemKind::Text, "B", 1, None),
        ];
        let chunks = normalize(&items, NormalizeOptions { chunk_type: true });
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "H");
        assert_eq!(chunks[0].chunk_type, Some(ChunkType::Header));
        assert_eq!(chunks[1].text, "A");
        assert_eq!(chunks[2].text, "B");
    }

    #[test]
    fn heading_promotion_tags_title_when_text_level_present() {
        let items = vec![text_item(ParsedItemKind::Text, "Intro", 0, Some(1))];
        let chunks = normalize(&items, NormalizeOptions { chunk_type: true });
        assert_eq!(chunks[0].chunk_type, Some(ChunkType::Title));
    }

    #[test]
    fn property_page_monotonicity_default() {
        let items = vec![
            text_item(ParsedItemKind::Text, "A", 0, None),
            text_item(ParsedItemKind::Text, "B", 2, None),
            text_item(ParsedItemKind::Text, "C", 5, None),
        ];
        let chunks = normalize(&items, NormalizeOptions { chunk_type: false });
        let pages: Vec<u32> = chunks.iter().map(|c| c.page_number).collect();
        assert!(pages.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn sanitize_text_trims_and_drops_surrogates() {
        let cleaned = sanitize_text("  hello\u{FFFD}world  ");
        assert_eq!(cleaned, "hello\u{FFFD}world");
    }

    #[test]
    fn bare_image_with_only_path_is_dropped() {
        let mut item = text_item(ParsedItemKind::Image, "", 0, None);
        item.text = None;
        item.img_path = Some("img1.png".into());
        let chunks = normalize(&[item], NormalizeOptions { chunk_type: false });
        assert!(chunks.is_empty());
    }

    #[test]
    fn plain_text_export_separates_titles_with_blank_line() {
        let chunks = vec![
            Chunk { text: "H".into(), page_number: 1, chunk_type: Some(ChunkType::Title) },
            Chunk { text: "body".into(), page_number: 1, chunk_type: None },
        ];
        assert_eq!(to_plain_text(&chunks), "H\n\nbody");
    }
}
