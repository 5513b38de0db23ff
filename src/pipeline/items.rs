//! Line-item normalisation: raw item entries → validated [`LineItem`]s.
//!
//! Each entry is judged on its own. An entry without a usable `item_amount`
//! is dropped with a warning; everything else has a fallback:
//!
//! | field           | absent / unparseable |
//! |-----------------|----------------------|
//! | `item_name`     | `"Unknown"`          |
//! | `item_rate`     | `0.0`                |
//! | `item_quantity` | `0.0`                |
//! | `item_amount`   | entry dropped        |

use crate::error::ItemError;
use crate::output::{LineItem, PageResult, UNKNOWN_ITEM_NAME};
use crate::pipeline::response::{parse_number, ExtractionRecord};
use serde_json::Value;
use tracing::{debug, warn};

/// Turn one decoded record into zero or one [`PageResult`].
///
/// A failed record with no items yields nothing. A record whose items are
/// all malformed yields a page with an empty item list; dropping such pages
/// is the caller's decision.
pub fn normalize_line_items(record: &ExtractionRecord) -> Vec<PageResult> {
    if record.is_failed() && record.line_items.is_empty() {
        debug!("Page {}: no result ({:?})", record.page_no, record.error);
        return Vec::new();
    }

    let mut bill_items = Vec::with_capacity(record.line_items.len());
    for (idx, raw) in record.line_items.iter().enumerate() {
        match convert_item(raw) {
            Ok(item) => bill_items.push(item),
            Err(e) => warn!(
                "Page {}: dropping line item #{}: {}",
                record.page_no,
                idx + 1,
                e
            ),
        }
    }

    vec![PageResult {
        page_no: record.page_no.clone(),
        page_type: record.page_type,
        bill_items,
        actual_bill_total: record.actual_bill_total,
    }]
}

/// Validate a single raw entry.
pub fn convert_item(raw: &Value) -> Result<LineItem, ItemError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ItemError::NotAnObject(truncate(&raw.to_string())))?;

    let amount = match obj.get("item_amount") {
        None | Some(Value::Null) => return Err(ItemError::MissingAmount),
        Some(v) => parse_number(v).ok_or_else(|| ItemError::InvalidAmount(truncate(&v.to_string())))?,
    };

    let name = match obj.get("item_name") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        None | Some(Value::Null) | Some(Value::String(_)) => UNKNOWN_ITEM_NAME.to_string(),
        Some(other) => other.to_string(),
    };

    Ok(LineItem::new(name, amount)
        .with_rate(optional_number(obj.get("item_rate"), "item_rate"))
        .with_quantity(optional_number(obj.get("item_quantity"), "item_quantity")))
}

fn optional_number(v: Option<&Value>, field: &str) -> f64 {
    match v {
        None | Some(Value::Null) => 0.0,
        Some(v) => parse_number(v).unwrap_or_else(|| {
            debug!("{} {} is not a number; using 0.0", field, v);
            0.0
        }),
    }
}

fn truncate(s: &str) -> String {
    const MAX: usize = 80;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(MAX).collect();
        t.push('…');
        t
    }
}
