//! End-to-end pipeline tests against a scripted vision model.
//!
//! No network and no live model: documents come from an in-memory
//! [`DocumentSource`], and the [`VisionModel`] fake answers by looking at the
//! width of the page image it receives, so concurrent pages can be told
//! apart regardless of completion order.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_billx::config::DEFAULT_USER_AGENT;
use edgequake_billx::{
    AcquisitionError, BillError, BillExtractor, DocumentSource, ExtractResponse,
    ExtractionConfig, ExtractionProgressCallback, FetchedDocument, HttpSource, Page, PageType,
    VisionModel,
};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Scripted answer for one page, keyed by image width.
#[derive(Clone)]
struct Script {
    answer: Result<String, String>,
    delay_ms: u64,
}

#[derive(Default)]
struct ScriptedModel {
    by_width: HashMap<u32, Script>,
    repair_answer: Option<Result<String, String>>,
    image_calls: AtomicUsize,
    repair_calls: AtomicUsize,
}

impl ScriptedModel {
    fn page(mut self, width: u32, answer: Result<&str, &str>) -> Self {
        self.by_width.insert(
            width,
            Script {
                answer: answer.map(String::from).map_err(String::from),
                delay_ms: 0,
            },
        );
        self
    }

    fn delayed_page(mut self, width: u32, answer: &str, delay_ms: u64) -> Self {
        self.by_width.insert(
            width,
            Script {
                answer: Ok(answer.to_string()),
                delay_ms,
            },
        );
        self
    }

    fn repair(mut self, answer: Result<&str, &str>) -> Self {
        self.repair_answer = Some(answer.map(String::from).map_err(String::from));
        self
    }
}

fn width_of(image: &ImageData) -> u32 {
    let bytes = STANDARD.decode(&image.data).expect("fake received invalid base64");
    image::load_from_memory(&bytes)
        .expect("fake received undecodable PNG")
        .width()
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn generate_with_image(&self, _prompt: &str, image: &ImageData) -> Result<String, String> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let width = width_of(image);
        let script = self
            .by_width
            .get(&width)
            .cloned()
            .unwrap_or_else(|| panic!("no script for page width {width}"));
        if script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }
        script.answer
    }

    async fn generate(&self, _prompt: &str) -> Result<String, String> {
        self.repair_calls.fetch_add(1, Ordering::SeqCst);
        self.repair_answer
            .clone()
            .unwrap_or_else(|| Err("repair not scripted".into()))
    }
}

/// Serves the same bytes for every URL.
struct StaticSource {
    result: Result<FetchedDocument, fn(&str) -> AcquisitionError>,
}

impl StaticSource {
    fn png(width: u32) -> Self {
        Self {
            result: Ok(FetchedDocument {
                bytes: png_bytes(width, 12),
                content_type: Some("image/png".into()),
            }),
        }
    }

    fn bytes(bytes: &[u8], content_type: &str) -> Self {
        Self {
            result: Ok(FetchedDocument {
                bytes: bytes.to_vec(),
                content_type: Some(content_type.into()),
            }),
        }
    }

    fn failing(err: fn(&str) -> AcquisitionError) -> Self {
        Self { result: Err(err) }
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, AcquisitionError> {
        match &self.result {
            Ok(doc) => Ok(doc.clone()),
            Err(make) => Err(make(url)),
        }
    }
}

#[derive(Default)]
struct CountingProgress {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    finished: Mutex<Option<(usize, usize)>>,
}

impl ExtractionProgressCallback for CountingProgress {
    fn on_page_start(&self, _page_no: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page_no: usize, _total: usize, _items: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _page_no: usize, _total: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_extraction_complete(&self, total: usize, success: usize) {
        *self.finished.lock().unwrap() = Some((total, success));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn rgb(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([250, 250, 250])))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    rgb(width, height)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Pages whose widths are 10, 20, 30, …
fn pages(n: usize) -> Vec<Page> {
    (1..=n)
        .map(|i| Page {
            page_no: i,
            image: rgb(10 * i as u32, 12),
        })
        .collect()
}

fn config(concurrency: usize, tolerance: f64) -> ExtractionConfig {
    ExtractionConfig::builder()
        .concurrency(concurrency)
        .tolerance_percent(tolerance)
        .api_timeout_secs(10)
        .build()
        .unwrap()
}

fn extractor(model: ScriptedModel, source: StaticSource, config: ExtractionConfig) -> BillExtractor {
    BillExtractor::new(Arc::new(model), Arc::new(source), config)
}

fn record(page_no: &str, page_type: &str, items: &[(&str, f64)], actual: f64) -> String {
    let items: Vec<_> = items
        .iter()
        .map(|(name, amount)| {
            serde_json::json!({
                "item_name": name,
                "item_quantity": 1.0,
                "item_rate": amount,
                "item_amount": amount,
            })
        })
        .collect();
    serde_json::json!({
        "page_no": page_no,
        "page_type": page_type,
        "line_items": items,
        "extracted_total": 0.0,
        "actual_bill_total": actual,
    })
    .to_string()
}

const CONSULTATION_BILL: &str = r#"{"page_no":"1","page_type":"Bill Detail","line_items":[{"item_name":"Consultation","item_quantity":1.0,"item_rate":500.0,"item_amount":500.0},{"item_name":"Medicine","item_quantity":2.0,"item_rate":50.0,"item_amount":100.0}],"extracted_total":600.0,"actual_bill_total":600.0}"#;

const DOWNLOAD_FAILED: &str = "Failed to download document from provided URL";
const NO_ITEMS: &str = "No line items could be extracted from the document";

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_image_bill_reconciles_to_600() {
    init_tracing();
    let model = ScriptedModel::default().page(40, Ok(CONSULTATION_BILL));
    let ex = extractor(model, StaticSource::png(40), config(4, 0.01));

    let response = ex.extract("https://bills.test/receipt.png").await;

    assert!(response.is_success, "{:?}", response.error);
    assert!(response.error.is_none());
    let data = response.data.unwrap();
    assert_eq!(data.total_item_count, 2);
    assert_eq!(data.reconciled_amount, 600.0);
    assert_eq!(data.pagewise_line_items.len(), 1);
    let page = &data.pagewise_line_items[0];
    assert_eq!(page.page_no, "1");
    assert_eq!(page.page_type, PageType::BillDetail);
    assert_eq!(page.bill_items[1].item_name, "Medicine");
    assert_eq!(page.bill_items[1].item_quantity, 2.0);
}

#[tokio::test]
async fn response_serialises_to_wire_format() {
    let model = ScriptedModel::default().page(40, Ok(CONSULTATION_BILL));
    let ex = extractor(model, StaticSource::png(40), config(1, 0.01));

    let json = serde_json::to_value(ex.extract("https://bills.test/r.png").await).unwrap();

    assert_eq!(json["is_success"], true);
    assert_eq!(json["error"], serde_json::Value::Null);
    assert_eq!(json["data"]["total_item_count"], 2);
    assert_eq!(json["data"]["reconciled_amount"], 600.0);
    let page = &json["data"]["pagewise_line_items"][0];
    assert_eq!(page["page_type"], "Bill Detail");
    assert_eq!(page["bill_items"][0]["item_name"], "Consultation");
    assert!(page.get("actual_bill_total").is_none());
}

#[tokio::test]
async fn fenced_response_needs_no_repair() {
    let fenced = format!("Here you go:\n```json\n{CONSULTATION_BILL}\n```");
    let model = Arc::new(ScriptedModel::default().page(40, Ok(&fenced)));
    let ex = BillExtractor::new(model.clone(), Arc::new(StaticSource::png(40)), config(1, 0.01));

    let response = ex.extract("https://bills.test/r.png").await;

    assert!(response.is_success);
    assert_eq!(model.repair_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_json_is_repaired_once() {
    init_tracing();
    let model = Arc::new(
        ScriptedModel::default()
            .page(40, Ok(r#"{"page_no": "1", "line_items": [{"item_name": "Consultation",, }"#))
            .repair(Ok(CONSULTATION_BILL)),
    );
    let ex = BillExtractor::new(model.clone(), Arc::new(StaticSource::png(40)), config(1, 0.01));

    let response = ex.extract("https://bills.test/r.png").await;

    assert!(response.is_success, "{:?}", response.error);
    assert_eq!(response.data.unwrap().reconciled_amount, 600.0);
    assert_eq!(model.image_calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.repair_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unrepairable_single_page_fails_the_document() {
    let model = ScriptedModel::default()
        .page(40, Ok("I could not read this bill."))
        .repair(Ok("Sorry, still cannot."));
    let ex = extractor(model, StaticSource::png(40), config(1, 0.01));

    let response = ex.extract("https://bills.test/r.png").await;

    assert_eq!(response, ExtractResponse::failure(NO_ITEMS));
}

#[tokio::test]
async fn all_pages_failing_reports_no_line_items() {
    let model = ScriptedModel::default()
        .page(10, Err("503 Service Unavailable"))
        .page(20, Err("connection reset"));
    let ex = extractor(model, StaticSource::png(10), config(2, 0.01));

    let err = tokio_test::assert_err!(ex.extract_pages(pages(2)).await);

    assert!(matches!(err, BillError::NoLineItems { pages: 2 }));
    assert_eq!(err.to_string(), NO_ITEMS);
}

#[tokio::test]
async fn failed_middle_page_is_skipped() {
    init_tracing();
    let model = ScriptedModel::default()
        .page(10, Ok(&record("1", "Bill Detail", &[("Room", 1000.0)], 0.0)))
        .page(20, Err("timeout talking to provider"))
        .page(30, Ok(&record("3", "Pharmacy", &[("Syrup", 45.5), ("Tablets", 12.25)], 0.0)));
    let progress = Arc::new(CountingProgress::default());
    let mut cfg = config(3, 0.01);
    cfg.progress_callback = Some(progress.clone() as Arc<dyn ExtractionProgressCallback>);
    let ex = extractor(model, StaticSource::png(10), cfg);

    let data = tokio_test::assert_ok!(ex.extract_pages(pages(3)).await);

    let numbers: Vec<_> = data.pagewise_line_items.iter().map(|p| p.page_no.as_str()).collect();
    assert_eq!(numbers, ["1", "3"]);
    assert_eq!(data.total_item_count, 3);
    assert_eq!(data.reconciled_amount, 1057.75);
    assert_eq!(data.pagewise_line_items[1].page_type, PageType::Pharmacy);

    assert_eq!(progress.started.load(Ordering::SeqCst), 3);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 2);
    assert_eq!(progress.errors.load(Ordering::SeqCst), 1);
    assert_eq!(*progress.finished.lock().unwrap(), Some((3, 2)));
}

#[tokio::test]
async fn pages_keep_physical_order_under_concurrency() {
    // Page 1 finishes last, page 3 first.
    let model = ScriptedModel::default()
        .delayed_page(10, &record("1", "Bill Detail", &[("A", 1.0)], 0.0), 120)
        .delayed_page(20, &record("2", "Bill Detail", &[("B", 2.0)], 0.0), 60)
        .delayed_page(30, &record("3", "Final Bill", &[("C", 3.0)], 6.0), 0);
    let ex = extractor(model, StaticSource::png(10), config(3, 0.01));

    let data = tokio_test::assert_ok!(ex.extract_pages(pages(3)).await);

    let names: Vec<_> = data
        .pagewise_line_items
        .iter()
        .map(|p| p.bill_items[0].item_name.as_str())
        .collect();
    assert_eq!(names, ["A", "B", "C"]);
    assert_eq!(data.reconciled_amount, 6.0);
}

#[tokio::test]
async fn model_page_numbers_are_overridden() {
    let model = ScriptedModel::default()
        .page(10, Ok(&record("7", "Bill Detail", &[("A", 1.0)], 0.0)))
        .page(20, Ok(&record("7", "Bill Detail", &[("B", 2.0)], 0.0)));
    let ex = extractor(model, StaticSource::png(10), config(2, 0.01));

    let data = tokio_test::assert_ok!(ex.extract_pages(pages(2)).await);

    let numbers: Vec<_> = data.pagewise_line_items.iter().map(|p| p.page_no.as_str()).collect();
    assert_eq!(numbers, ["1", "2"]);
}

#[tokio::test]
async fn page_with_only_malformed_items_is_dropped() {
    let junk = r#"{"page_no":"2","page_type":"Bill Detail","line_items":[{"item_name":"Total"},{"item_name":"GST","item_amount":"n/a"}],"actual_bill_total":0}"#;
    let model = ScriptedModel::default()
        .page(10, Ok(&record("1", "Bill Detail", &[("Bed", 800.0)], 800.0)))
        .page(20, Ok(junk));
    let ex = extractor(model, StaticSource::png(10), config(2, 0.01));

    let data = tokio_test::assert_ok!(ex.extract_pages(pages(2)).await);

    assert_eq!(data.pagewise_line_items.len(), 1);
    assert_eq!(data.total_item_count, 1);
    assert_eq!(data.reconciled_amount, 800.0);
}

#[tokio::test]
async fn validation_mismatch_never_blocks_success() {
    init_tracing();
    let model = ScriptedModel::default().page(
        40,
        Ok(&record("1", "Bill Detail", &[("Consultation", 100.0)], 150.0)),
    );
    let ex = extractor(model, StaticSource::png(40), config(1, 1.0));

    let response = ex.extract("https://bills.test/r.png").await;

    assert!(response.is_success);
    assert_eq!(response.data.unwrap().reconciled_amount, 100.0);
}

#[tokio::test]
async fn source_failure_maps_to_download_message() {
    let model = ScriptedModel::default();
    let source = StaticSource::failing(|url| AcquisitionError::HttpStatus {
        url: url.to_string(),
        status: 404,
    });
    let ex = extractor(model, source, config(1, 0.01));

    let response = ex.extract("https://bills.test/missing.pdf").await;

    assert_eq!(response, ExtractResponse::failure(DOWNLOAD_FAILED));
}

#[tokio::test]
async fn undecodable_payload_maps_to_download_message() {
    let model = ScriptedModel::default();
    let source = StaticSource::bytes(b"<html><body>Access denied</body></html>", "text/html");
    let ex = extractor(model, source, config(1, 0.01));

    let err = tokio_test::assert_err!(ex.try_extract("https://bills.test/bill").await);

    assert!(matches!(
        err,
        BillError::DownloadFailed {
            source: AcquisitionError::Undecodable { .. }
        }
    ));
    assert_eq!(err.to_string(), DOWNLOAD_FAILED);
}

#[tokio::test]
async fn non_http_url_is_rejected_before_any_request() {
    let source = HttpSource::new(DEFAULT_USER_AGENT, 5).unwrap();
    let ex = BillExtractor::new(
        Arc::new(ScriptedModel::default()),
        Arc::new(source),
        config(1, 0.01),
    );

    let response = ex.extract("not a url").await;

    assert!(!response.is_success);
    assert!(response.data.is_none());
    assert_eq!(response.error.as_deref(), Some(DOWNLOAD_FAILED));
}

#[tokio::test]
async fn oversized_page_is_downscaled_before_the_model_sees_it() {
    // 4096 wide → 2048 after normalisation; the script is keyed on that.
    let model = ScriptedModel::default().page(2048, Ok(CONSULTATION_BILL));
    let ex = extractor(model, StaticSource::png(10), config(1, 0.01));
    let page = Page {
        page_no: 1,
        image: rgb(4096, 64),
    };

    let data = tokio_test::assert_ok!(ex.extract_pages(vec![page]).await);
    assert_eq!(data.reconciled_amount, 600.0);
}
