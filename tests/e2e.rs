//! End-to-end integration tests over in-memory fakes for the external
//! collaborators (Parser Adapter, Object Store, Broker) — spec §8's S2, S5,
//! S6 scenarios driven through the real runner/merge code paths rather than
//! against a live GPU worker or object store.
//!
//! Unlike the teacher's `tests/e2e.rs` (gated behind `E2E_ENABLED`, needs
//! real PDFs and a live LLM key), every test here runs unconditionally: the
//! collaborators this crate treats as external (spec §1) are faked in-process.

use async_trait::async_trait;
use docparse_orchestrator::model::{Chunk, ChunkType, ImageJob, ParsedItem, ParsedItemKind, VisionResult};
use docparse_orchestrator::runner::{RunnerRequest, SingleStageRunner, UploadRequest};
use docparse_orchestrator::{OrchestratorConfig, OrchestratorError, ParseOptions, ParseOutput, ParserAdapter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

fn fixture_pdf() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/blank.pdf")
}

fn text_item(kind: ParsedItemKind, text: &str, page_idx: u32) -> ParsedItem {
    ParsedItem {
        kind,
        page_idx,
        text_level: None,
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

struct FakeParserAdapter {
    items: Vec<ParsedItem>,
}

#[async_trait]
impl ParserAdapter for FakeParserAdapter {
    async fn parse(&self, _file_path: &Path, _options: &ParseOptions) -> Result<ParseOutput, OrchestratorError> {
        Ok(ParseOutput { items: self.items.clone(), output_dir: PathBuf::from("/tmp/fake-output"), markdown: None })
    }
}

#[derive(Default)]
struct FakeObjectStore {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl docparse_orchestrator::object_store::ObjectStore for FakeObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), OrchestratorError> {
        self.calls.lock().unwrap().push(format!("ensure_bucket:{bucket}"));
        Ok(())
    }

    async fn clear_prefix(&self, bucket: &str, prefix: &str) -> Result<(), OrchestratorError> {
        self.calls.lock().unwrap().push(format!("clear_prefix:{bucket}/{prefix}"));
        Ok(())
    }

    async fn upload_bytes(
        &self,
        bucket: &str,
        object_name: &str,
        _data: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), OrchestratorError> {
        self.calls.lock().unwrap().push(format!("upload_bytes:{bucket}/{object_name}"));
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket: &str,
        object_name: &str,
        _file_path: &Path,
        _content_type: &str,
    ) -> Result<(), OrchestratorError> {
        self.calls.lock().unwrap().push(format!("upload_file:{bucket}/{object_name}"));
        Ok(())
    }

    async fn prepare_download(
        &self,
        _bucket: &str,
        _object_name: &str,
    ) -> Result<
        (
            futures::stream::BoxStream<'static, Result<Vec<u8>, OrchestratorError>>,
            docparse_orchestrator::model::MinioObjectInfo,
        ),
        OrchestratorError,
    > {
        unimplemented!("not exercised by these tests")
    }
}

/// S2 — default filtering end-to-end through the single-stage runner: a
/// header, a page number, and two text items in, only the two text chunks
/// survive with `chunk_type=false`.
#[tokio::test]
async fn s2_default_filtering_through_single_stage_runner() {
    let config = OrchestratorConfig::builder().build().unwrap();
    let parser = Arc::new(FakeParserAdapter {
        items: vec![
            text_item(ParsedItemKind::Text, "A", 0),
            text_item(ParsedItemKind::Header, "H", 0),
            text_item(ParsedItemKind::Text, "B", 1),
            text_item(ParsedItemKind::PageNumber, "2", 1),
        ],
    });
    let runner = SingleStageRunner::new(config, parser, None, None);

    let result = runner
        .run(RunnerRequest {
            source_path: fixture_pdf(),
            original_filename: "blank.pdf".into(),
            chunk_type: false,
            return_txt: false,
            backend: None,
            pipeline: "ocr".into(),
            upload: None,
        })
        .await
        .unwrap();

    assert_eq!(result.result.len(), 2);
    assert_eq!(result.result[0].text, "A");
    assert_eq!(result.result[1].text, "B");
}

/// S6 — object-store bundle: uploading clears the prefix first, then writes
/// `source.pdf`, `parsed.json`, and one page image, all under the same
/// sanitized prefix.
#[tokio::test]
async fn s6_upload_clears_prefix_then_writes_bundle() {
    let config = OrchestratorConfig::builder().build().unwrap();
    let parser = Arc::new(FakeParserAdapter { items: vec![text_item(ParsedItemKind::Text, "Hello", 0)] });
    let store = Arc::new(FakeObjectStore::default());
    let runner = SingleStageRunner::new(config, parser, None, Some(store.clone()));

    let result = runner
        .run(RunnerRequest {
            source_path: fixture_pdf(),
            original_filename: "report.pdf".into(),
            chunk_type: false,
            return_txt: false,
            backend: None,
            pipeline: "ocr".into(),
            upload: Some(UploadRequest { bucket: "docs".into(), prefix: None, meta: None }),
        })
        .await
        .unwrap();

    let assets = result.minio_assets.expect("upload requested, expected minio_assets");
    assert_eq!(assets.bucket, "docs");
    assert_eq!(assets.pdf_object, "mineru/report/source.pdf");

    let calls = store.calls.lock().unwrap();
    assert!(calls.iter().any(|c| c.starts_with("ensure_bucket:docs")));
    let clear_idx = calls.iter().position(|c| c.starts_with("clear_prefix:")).expect("clear_prefix called");
    let upload_idx = calls.iter().position(|c| c.contains("source.pdf")).expect("source.pdf uploaded");
    assert!(clear_idx < upload_idx, "prefix must be cleared before any object is written");
}

/// S5 — two-stage image fan-out: vision results that resolve out of order
/// still merge into document order by `seq`.
#[test]
fn s5_merge_reorders_out_of_order_vision_results_by_seq() {
    use docparse_orchestrator::two_stage::merge::merge_content;

    let mut items = Vec::new();
    for seq in 1..=3u32 {
        let mut image = text_item(ParsedItemKind::Image, "", seq - 1);
        image.text = None;
        image.img_path = Some(format!("img{seq}.png"));
        image.image_seq = Some(seq);
        items.push(image);
    }

    // Vision results resolve out of order: 3, then 1, then 2.
    let vision_results = vec![
        VisionResult { seq: 3, vision_text: "third".into(), error: None },
        VisionResult { seq: 1, vision_text: "first".into(), error: None },
        VisionResult { seq: 2, vision_text: "second".into(), error: None },
    ];

    let chunks: Vec<Chunk> = merge_content(&items, &vision_results, false);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].text, "first");
    assert_eq!(chunks[1].text, "second");
    assert_eq!(chunks[2].text, "third");
}

/// The canonical `ConversionResult` must round-trip through JSON (used by
/// the CLI and any HTTP surface built on top of this crate).
#[test]
fn conversion_result_round_trips_through_json() {
    let result = docparse_orchestrator::ConversionResult {
        result: vec![Chunk { text: "hi".into(), page_number: 1, chunk_type: Some(ChunkType::Title) }],
        txt: Some("hi".into()),
        minio_assets: None,
    };
    let json = serde_json::to_string(&result).unwrap();
    let back: docparse_orchestrator::ConversionResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back.result.len(), 1);
    assert_eq!(back.txt.as_deref(), Some("hi"));
}

#[allow(dead_code)]
fn unused_image_job_constructor_for_type_check() -> ImageJob {
    ImageJob { seq: 0, page_number: 0, is_title: false, image_path: String::new(), context_payload: String::new(), base_text: String::new() }
}
