//! Result types produced by the extraction pipeline.
//!
//! The JSON shape of [`ExtractResponse`] is the wire contract of the `billx`
//! binary and of any service that embeds the library:
//!
//! ```text
//! ExtractResponse
//!  ├─ is_success
//!  ├─ error                      (failure only)
//!  └─ data: ExtractData          (success only)
//!       ├─ pagewise_line_items: [PageResult]
//!       │     ├─ page_no, page_type
//!       │     └─ bill_items: [LineItem]
//!       ├─ total_item_count
//!       └─ reconciled_amount
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used when the model omits `item_name`.
pub const UNKNOWN_ITEM_NAME: &str = "Unknown";

/// Classification of a bill page.
///
/// The vision model is asked for exactly one of three labels. Anything else
/// is coerced to [`PageType::BillDetail`] during decode rather than trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PageType {
    /// Itemised detail page (default).
    #[default]
    #[serde(rename = "Bill Detail")]
    BillDetail,
    /// Summary page carrying the grand total.
    #[serde(rename = "Final Bill")]
    FinalBill,
    /// Pharmacy / medicines page.
    #[serde(rename = "Pharmacy")]
    Pharmacy,
}

impl PageType {
    /// The exact label used in prompts and JSON.
    pub fn label(self) -> &'static str {
        match self {
            PageType::BillDetail => "Bill Detail",
            PageType::FinalBill => "Final Bill",
            PageType::Pharmacy => "Pharmacy",
        }
    }

    /// Parse a model-supplied label, tolerating case, separators and spacing.
    ///
    /// Returns `None` for anything outside the closed set.
    pub fn from_label(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "billdetail" | "billdetails" => Some(PageType::BillDetail),
            "finalbill" => Some(PageType::FinalBill),
            "pharmacy" => Some(PageType::Pharmacy),
            _ => None,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One validated line item from a bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product/service description.
    pub item_name: String,
    /// Total amount for the line. The only numerically trusted field.
    pub item_amount: f64,
    /// Rate per unit; 0.0 when the bill doesn't print one.
    pub item_rate: f64,
    /// Quantity; 0.0 when the bill doesn't print one.
    pub item_quantity: f64,
}

impl LineItem {
    pub fn new(item_name: impl Into<String>, item_amount: f64) -> Self {
        Self {
            item_name: item_name.into(),
            item_amount,
            item_rate: 0.0,
            item_quantity: 0.0,
        }
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.item_rate = rate;
        self
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.item_quantity = quantity;
        self
    }
}

/// Line items extracted from a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// Page number as a string (1-indexed).
    pub page_no: String,

    /// Page classification reported by the model.
    #[serde(default)]
    pub page_type: PageType,

    /// Items in the order the model reported them.
    pub bill_items: Vec<LineItem>,

    /// Total the model read off the page. Used for advisory validation only.
    #[serde(skip)]
    pub actual_bill_total: f64,
}

impl PageResult {
    pub fn item_count(&self) -> usize {
        self.bill_items.len()
    }

    /// Sum of this page's `item_amount`s, unrounded.
    pub fn amount(&self) -> f64 {
        crate::pipeline::reconcile::compensated_sum(self.bill_items.iter().map(|i| i.item_amount))
    }
}

/// Aggregate over every page of a document.
///
/// Derived once by [`crate::pipeline::reconcile::reconcile`]; never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Number of line items across all pages.
    pub total_item_count: usize,
    /// Sum of every `item_amount`, rounded half-up to 2 decimal places.
    pub reconciled_amount: f64,
}

/// Payload of a successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractData {
    pub pagewise_line_items: Vec<PageResult>,
    pub total_item_count: usize,
    pub reconciled_amount: f64,
}

impl ExtractData {
    pub fn new(pages: Vec<PageResult>, totals: ReconciliationResult) -> Self {
        Self {
            pagewise_line_items: pages,
            total_item_count: totals.total_item_count,
            reconciled_amount: totals.reconciled_amount,
        }
    }
}

/// The result of one extraction request. Always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub is_success: bool,
    pub data: Option<ExtractData>,
    pub error: Option<String>,
}

impl ExtractResponse {
    pub fn success(data: ExtractData) -> Self {
        Self {
            is_success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
