//! Response decoding: VLM free text → [`ExtractionRecord`].
//!
//! Even well-prompted VLMs wrap JSON in ```` ```json ```` fences, prepend a
//! sentence of prose, or emit a BOM. This module applies cheap deterministic
//! cleanup before decoding and then reads the schema *defensively*:
//!
//! - `page_no` may arrive as a string or a number
//! - `page_type` outside the closed set is coerced to the default
//! - totals may be numbers or numeric strings (`"1,250.00"`, `"₹ 500"`)
//! - `line_items` entries are kept raw; [`crate::pipeline::items`] validates
//!   them one by one so a single bad entry can't sink the page
//!
//! Only a payload that is not a JSON object at all counts as a decode
//! failure (and triggers the repair call in [`crate::pipeline::llm`]).

use crate::error::ExtractionError;
use crate::output::PageType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Decoded model output for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRecord {
    pub page_no: String,
    pub page_type: PageType,
    /// Raw item entries, validated later.
    pub line_items: Vec<Value>,
    /// The model's own sum of the items it extracted.
    pub extracted_total: f64,
    /// The total printed on the bill, as read by the model.
    pub actual_bill_total: f64,
    /// Set when extraction failed; `line_items` is then empty.
    pub error: Option<ExtractionError>,
}

impl ExtractionRecord {
    /// The canonical empty record carrying an error.
    pub fn failed(error: ExtractionError) -> Self {
        Self {
            page_no: "1".to_string(),
            page_type: PageType::default(),
            line_items: Vec::new(),
            extracted_total: 0.0,
            actual_bill_total: 0.0,
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Schema as the model is asked to emit it, every field optional.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    page_no: Option<Value>,
    #[serde(default)]
    page_type: Option<Value>,
    #[serde(default)]
    line_items: Option<Value>,
    #[serde(default)]
    extracted_total: Option<Value>,
    #[serde(default)]
    actual_bill_total: Option<Value>,
}

// ── Cleanup ───────────────────────────────────────────────────────────────

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?i:json)?[ \t]*\n?(.*?)\n?[ \t]*```").unwrap());

/// Strip invisible characters and code fences from a raw model response.
pub fn clean_response(raw: &str) -> String {
    let s = remove_invisible_chars(raw);
    let s = s.replace("\r\n", "\n");
    strip_code_fences(s.trim())
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

/// Handles both ```` ``` ```` and ```` ```json ```` fences, including an
/// unterminated opening fence (truncated responses).
fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_FENCED_BLOCK.captures(input) {
        return caps[1].trim().to_string();
    }
    let mut s = input;
    if let Some(rest) = s.strip_prefix("```") {
        s = rest;
        if s.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            s = &s[4..];
        }
    }
    s.trim().trim_end_matches("```").trim().to_string()
}

/// The outermost `{ ... }` slice, for responses with prose around the JSON.
fn json_object_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

// ── Decode ────────────────────────────────────────────────────────────────

/// Decode a cleaned response into an [`ExtractionRecord`].
///
/// Returns the decoder's message on failure.
pub fn decode_record(text: &str) -> Result<ExtractionRecord, String> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(first) => json_object_slice(text)
            .filter(|slice| slice.len() < text.len())
            .and_then(|slice| serde_json::from_str(slice).ok())
            .ok_or_else(|| first.to_string())?,
    };

    if !value.is_object() {
        return Err(format!("expected a JSON object, got {}", value_kind(&value)));
    }

    let raw: RawRecord = serde_json::from_value(value).map_err(|e| e.to_string())?;

    let page_no = raw
        .page_no
        .as_ref()
        .and_then(page_no_from_value)
        .unwrap_or_else(|| "1".to_string());

    let page_type = match raw.page_type.as_ref() {
        None => PageType::default(),
        Some(v) => {
            let label = v.as_str().unwrap_or_default();
            PageType::from_label(label).unwrap_or_else(|| {
                warn!("Unknown page_type {}; using \"{}\"", v, PageType::default());
                PageType::default()
            })
        }
    };

    let line_items = match raw.line_items {
        Some(Value::Array(items)) => items,
        None => Vec::new(),
        Some(other) => {
            warn!("line_items is {}, not an array; ignoring", value_kind(&other));
            Vec::new()
        }
    };

    Ok(ExtractionRecord {
        page_no,
        page_type,
        line_items,
        extracted_total: raw
            .extracted_total
            .as_ref()
            .and_then(parse_number)
            .unwrap_or(0.0),
        actual_bill_total: raw
            .actual_bill_total
            .as_ref()
            .and_then(parse_number)
            .unwrap_or(0.0),
        error: None,
    })
}

/// Clean and decode in one step.
pub fn parse_response(raw: &str) -> Result<ExtractionRecord, String> {
    decode_record(&clean_response(raw))
}

fn page_no_from_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => match n.as_u64() {
            Some(u) => Some(u.to_string()),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| format!("{}", f as u64)),
        },
        _ => None,
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Numbers ───────────────────────────────────────────────────────────────

/// Currency markers a model sometimes copies in front of an amount.
const CURRENCY_PREFIXES: &[&str] = &["INR", "Rs.", "Rs", "₹", "$", "€", "£"];

/// Read a finite number from a JSON number or a numeric string.
///
/// Strings may carry a leading currency marker and `,` separators in
/// thousands (`1,234,567`) or lakh (`12,34,567`) groups. A comma anywhere
/// else (`12,50`, `1.234,56`) is ambiguous and the value is rejected, as
/// are booleans, null and non-finite values.
pub fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_numeric_str(s),
        _ => None,
    }
}

/// Digits grouped by `,` the way Western or Indian bills print them.
static RE_GROUPED_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(\d{1,3}(,\d{3})+|\d{1,2}(,\d{2})+,\d{3})(\.\d+)?$").unwrap()
});

fn parse_numeric_str(s: &str) -> Option<f64> {
    let mut s = s.trim();
    for prefix in CURRENCY_PREFIXES {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start();
            break;
        }
    }
    let s = s.trim();
    if s.contains(',') && !RE_GROUPED_NUMBER.is_match(s) {
        return None;
    }
    s.replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID: &str = r#"{"page_no":"1","page_type":"Bill Detail","line_items":[{"item_name":"Consultation","item_quantity":1.0,"item_rate":500.0,"item_amount":500.0}],"extracted_total":500.0,"actual_bill_total":500.0}"#;

    #[test]
    fn strip_json_fence() {
        let input = format!("```json\n{VALID}\n```");
        assert_eq!(clean_response(&input), VALID);
    }

    #[test]
    fn strip_plain_fence() {
        let input = format!("```\n{VALID}\n```");
        assert_eq!(clean_response(&input), VALID);
    }

    #[test]
    fn strip_inline_fence() {
        let input = format!("```json{VALID}```");
        assert_eq!(clean_response(&input), VALID);
    }

    #[test]
    fn strip_unterminated_fence() {
        let input = format!("```JSON\n{VALID}");
        assert_eq!(clean_response(&input), VALID);
    }

    #[test]
    fn no_fence_passthrough() {
        assert_eq!(clean_response(&format!("  {VALID}\n")), VALID);
    }

    #[test]
    fn bom_is_removed() {
        let rec = parse_response(&format!("\u{FEFF}{VALID}")).unwrap();
        assert_eq!(rec.line_items.len(), 1);
    }

    #[test]
    fn decode_valid_record() {
        let rec = parse_response(VALID).unwrap();
        assert_eq!(rec.page_no, "1");
        assert_eq!(rec.page_type, PageType::BillDetail);
        assert_eq!(rec.actual_bill_total, 500.0);
        assert!(rec.error.is_none());
    }

    #[test]
    fn decode_tolerates_prose_around_json() {
        let rec = parse_response(&format!("Here is the data:\n{VALID}\nHope this helps!")).unwrap();
        assert_eq!(rec.line_items.len(), 1);
    }

    #[test]
    fn decode_rejects_truncated_json() {
        let truncated = &VALID[..VALID.len() - 20];
        assert!(parse_response(truncated).is_err());
    }

    #[test]
    fn decode_rejects_non_object() {
        let err = parse_response("[1, 2, 3]").unwrap_err();
        assert!(err.contains("an array"), "got: {err}");
    }

    #[test]
    fn numeric_page_no_and_unknown_page_type() {
        let rec = parse_response(r#"{"page_no": 3, "page_type": "Summary", "line_items": []}"#).unwrap();
        assert_eq!(rec.page_no, "3");
        assert_eq!(rec.page_type, PageType::BillDetail);
        assert_eq!(rec.extracted_total, 0.0);
    }

    #[test]
    fn missing_fields_get_defaults() {
        let rec = parse_response("{}").unwrap();
        assert_eq!(rec.page_no, "1");
        assert!(rec.line_items.is_empty());
        assert_eq!(rec.actual_bill_total, 0.0);
    }

    #[test]
    fn non_array_line_items_are_ignored() {
        let rec = parse_response(r#"{"line_items": {"item_name": "x"}}"#).unwrap();
        assert!(rec.line_items.is_empty());
    }

    #[test]
    fn string_totals_are_parsed() {
        let rec = parse_response(r#"{"actual_bill_total": "₹ 1,250.50", "extracted_total": "Rs. 99"}"#)
            .unwrap();
        assert_eq!(rec.actual_bill_total, 1250.5);
        assert_eq!(rec.extracted_total, 99.0);
    }

    #[test]
    fn parse_number_cases() {
        assert_eq!(parse_number(&json!(201.0)), Some(201.0));
        assert_eq!(parse_number(&json!(7)), Some(7.0));
        assert_eq!(parse_number(&json!("12.5")), Some(12.5));
        assert_eq!(parse_number(&json!("$1,000")), Some(1000.0));
        assert_eq!(parse_number(&json!("INR 40")), Some(40.0));
        assert_eq!(parse_number(&json!("-3.25")), Some(-3.25));
        assert_eq!(parse_number(&json!("N/A")), None);
        assert_eq!(parse_number(&json!("NaN")), None);
        assert_eq!(parse_number(&json!("inf")), None);
        assert_eq!(parse_number(&json!(null)), None);
        assert_eq!(parse_number(&json!(true)), None);
        assert_eq!(parse_number(&json!("")), None);
    }

    #[test]
    fn only_grouping_commas_are_stripped() {
        assert_eq!(parse_number(&json!("1,234,567.50")), Some(1234567.5));
        assert_eq!(parse_number(&json!("12,34,567")), Some(1234567.0));
        assert_eq!(parse_number(&json!("₹ 1,00,000")), Some(100000.0));
        assert_eq!(parse_number(&json!("-1,250.00")), Some(-1250.0));
        assert_eq!(parse_number(&json!("12,50")), None);
        assert_eq!(parse_number(&json!("1.234,56")), None);
        assert_eq!(parse_number(&json!("1,2,3")), None);
        assert_eq!(parse_number(&json!("1,2345")), None);
    }

    #[test]
    fn failed_record_is_canonical() {
        let rec = ExtractionRecord::failed(ExtractionError::Timeout { secs: 5 });
        assert_eq!(rec.page_no, "1");
        assert_eq!(rec.page_type, PageType::BillDetail);
        assert!(rec.line_items.is_empty());
        assert_eq!(rec.actual_bill_total, 0.0);
        assert!(rec.is_failed());
    }
}
