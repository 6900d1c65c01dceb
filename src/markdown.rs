//! Markdown chunker: converts a Markdown document directly into the parser's
//! chunk shape, short-circuiting the GPU parser entirely (spec §4.7 step 2).
//!
//! Headings (`#`..`######`) become title chunks when `chunk_type` is set;
//! other paragraphs and list blocks are grouped by blank lines. A document
//! with neither headings nor blank lines still yields exactly one chunk.

use crate::model::{Chunk, ChunkType};
use once_cell::sync::Lazy;
use regex::Regex;

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(#{1,6})\s+(.*)$").unwrap());

pub fn parse_markdown_chunks(content: &str, chunk_type: bool, page_number: u32) -> Vec<Chunk> {
    let mut items = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();

    let flush = |buffer: &mut Vec<&str>, items: &mut Vec<Chunk>| {
        if buffer.is_empty() {
            return;
        }
        let text = buffer.join("\n").trim().to_string();
        buffer.clear();
        if text.is_empty() {
            return;
        }
        items.push(Chunk {
            text,
            page_number,
            chunk_type: None,
        });
    };

    for raw_line in content.lines() {
        let line = raw_line.trim_end();
        let stripped = line.trim_start();
        if let Some(caps) = HEADING_RE.captures(stripped) {
            flush(&mut buffer, &mut items);
            let heading_text = caps.get(2).unwrap().as_str().trim().to_string();
            if !heading_text.is_empty() {
                items.push(Chunk {
                    text: heading_text,
                    page_number,
                    chunk_type: if chunk_type { Some(ChunkType::Title) } else { None },
                });
            }
            continue;
        }

        if stripped.is_empty() {
            flush(&mut buffer, &mut items);
            continue;
        }

        buffer.push(line);
    }

    flush(&mut buffer, &mut items);

    if items.is_empty() && !content.trim().is_empty() {
        items.push(Chunk {
            text: content.trim().to_string(),
            page_number,
            chunk_type: None,
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_and_body_are_split() {
        let input = "# H\n\nbody\n\n## H2\n- a\n- b";
        let chunks = parse_markdown_chunks(input, true, 1);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].text, "H");
        assert_eq!(chunks[0].chunk_type, Some(ChunkType::Title));
        assert_eq!(chunks[1].text, "body");
        assert_eq!(chunks[1].chunk_type, None);
        assert_eq!(chunks[2].text, "H2");
        assert_eq!(chunks[2].chunk_type, Some(ChunkType::Title));
        assert_eq!(chunks[3].text, "- a\n- b");
    }

    #[test]
    fn structureless_document_yields_one_chunk() {
        let chunks = parse_markdown_chunks("just one line of text", false, 3);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 3);
    }

    #[test]
    fn empty_document_yields_nothing() {
        assert!(parse_markdown_chunks("   \n\n  ", false, 1).is_empty());
    }

    #[test]
    fn chunk_type_false_never_tags_headings() {
        let chunks = parse_markdown_chunks("# Title\nbody", false, 1);
        assert!(chunks.iter().all(|c| c.chunk_type.is_none()));
    }
}
