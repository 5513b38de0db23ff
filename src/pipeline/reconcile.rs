//! Reconciliation: page results → one trustworthy total.
//!
//! The reconciled amount is always the sum of the extracted line items. The
//! total the model read off the bill is only used for an advisory check;
//! a mismatch is logged and never changes the result.
//!
//! Summation uses Neumaier's compensated algorithm so that reordering items
//! cannot move the result across a rounding boundary. The final value is
//! rounded half-up (away from zero) to 2 decimal places.

use crate::output::{PageResult, PageType, ReconciliationResult};
use tracing::{debug, info, warn};

/// Default tolerance for [`validate_extraction`], in percent.
pub const DEFAULT_TOLERANCE_PERCENT: f64 = 0.01;

/// Aggregate item count and amount across every page.
pub fn reconcile(pages: &[PageResult]) -> ReconciliationResult {
    let total_item_count = pages.iter().map(PageResult::item_count).sum();
    let sum = compensated_sum(
        pages
            .iter()
            .flat_map(|p| p.bill_items.iter().map(|i| i.item_amount)),
    );
    let reconciled_amount = round_half_up_2(sum);
    debug!(
        "Reconciled {} items across {} pages: {:.2}",
        total_item_count,
        pages.len(),
        reconciled_amount
    );
    ReconciliationResult {
        total_item_count,
        reconciled_amount,
    }
}

/// `true` when `reconciled` is within `tolerance_percent` percent of
/// `actual_total`.
///
/// A zero `actual_total` only matches a zero `reconciled`. The deviation is
/// taken relative to `|actual_total|`, so a negative total (a credit note)
/// is checked the same way as a positive one instead of always passing.
pub fn validate_extraction(reconciled: f64, actual_total: f64, tolerance_percent: f64) -> bool {
    if actual_total == 0.0 {
        return reconciled == 0.0;
    }
    let pct = (reconciled - actual_total).abs() / actual_total.abs() * 100.0;
    pct <= tolerance_percent
}

/// The bill total the model reported for the whole document.
///
/// A "Final Bill" page carries the grand total, so the largest non-zero
/// total on such a page wins. Without one, per-page totals are summed.
pub fn reported_total(pages: &[PageResult]) -> f64 {
    let final_bill = pages
        .iter()
        .filter(|p| p.page_type == PageType::FinalBill && p.actual_bill_total != 0.0)
        .map(|p| p.actual_bill_total)
        .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))));

    final_bill.unwrap_or_else(|| compensated_sum(pages.iter().map(|p| p.actual_bill_total)))
}

/// Advisory per-page check of the item sum against the page's printed total.
pub fn check_page(page: &PageResult, tolerance_percent: f64) -> bool {
    if page.actual_bill_total == 0.0 {
        return true;
    }
    let amount = round_half_up_2(page.amount());
    let ok = validate_extraction(amount, page.actual_bill_total, tolerance_percent);
    if !ok {
        warn!(
            "Page {}: item sum {:.2} differs from printed total {:.2}",
            page.page_no, amount, page.actual_bill_total
        );
    }
    ok
}

/// Advisory document-level check. Returns `None` when the model reported no
/// total to compare against.
pub fn check_document(
    pages: &[PageResult],
    totals: &ReconciliationResult,
    tolerance_percent: f64,
) -> Option<bool> {
    let reported = reported_total(pages);
    if reported == 0.0 {
        debug!("No bill total reported; skipping validation");
        return None;
    }
    let ok = validate_extraction(totals.reconciled_amount, reported, tolerance_percent);
    if ok {
        info!(
            "Validation passed: reconciled {:.2} matches reported {:.2}",
            totals.reconciled_amount, reported
        );
    } else {
        warn!(
            "Validation mismatch: reconciled {:.2} vs reported {:.2} (tolerance {}%)",
            totals.reconciled_amount, reported, tolerance_percent
        );
    }
    Some(ok)
}

/// Neumaier compensated summation.
pub fn compensated_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut comp = 0.0_f64;
    for v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            comp += (sum - t) + v;
        } else {
            comp += (v - t) + sum;
        }
        sum = t;
    }
    sum + comp
}

/// Round to 2 decimal places, halves away from zero.
///
/// Works on the shortest decimal form of `x`, so `1.005` rounds to `1.01`
/// even though its binary value sits just below the half.
pub fn round_half_up_2(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let text = x.abs().to_string();
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), ""));
    if frac.len() <= 2 {
        return x;
    }
    let Ok(mut cents) = format!("{whole}{}", &frac[..2]).parse::<u128>() else {
        return x;
    };
    if frac.as_bytes()[2] >= b'5' {
        cents += 1;
    }
    (cents as f64 / 100.0).copysign(x)
}
