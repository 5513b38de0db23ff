//! Prompts for VLM-based bill extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the JSON schema the decoder expects and the
//!    schema the model is told to emit live next to each other.
//!
//! 2. **Testability**: unit tests can inspect prompts directly without
//!    spinning up a real VLM, making prompt regressions easy to catch.
//!
//! Callers can override the extraction prompt via
//! [`crate::config::ExtractionConfig::extraction_prompt`]; the constants here
//! are used only when no override is provided.

/// Default prompt sent with every page image.
///
/// Schema: `page_no`, `page_type`, `line_items[]` (`item_name`,
/// `item_quantity`, `item_rate`, `item_amount`), `extracted_total`,
/// `actual_bill_total`. Rate and quantity default to `0.0`, never `null`.
pub const EXTRACTION_PROMPT: &str = r#"You are an expert at extracting data from bills and invoices. Analyze this bill/invoice image carefully and extract ALL line items with their details.

CRITICAL INSTRUCTIONS:
1. Extract EVERY line item - do not miss any entries.
2. Do not double-count any items.
3. For each line item, extract:
   - item_name: The product/service name or description
   - item_quantity: The quantity. If NOT present, use 0.0 (not null)
   - item_rate: The rate/price per unit. If NOT present, use 0.0 (not null)
   - item_amount: The total amount for that line item (REQUIRED - extract EXACTLY as shown, no rounding)

4. IMPORTANT: Only extract MONETARY values for item_amount. DO NOT extract:
   - Invoice dates or times
   - Invoice numbers or IDs
   - Patient IDs or registration numbers
   - Any non-currency values

5. Identify the page_type. It must be EXACTLY one of: "Bill Detail", "Final Bill", "Pharmacy"

6. Look for the "Total" or "Net Amount" printed on the bill.

7. Verify your work: Sum up the item_amount of all line items. Compare with the printed total.
   - If they don't match, check if you missed an item or included a sub-total by mistake.
   - Do NOT include "Sub Total" or "Tax" lines as separate line items if they are already part of the final total.

Return the data in this EXACT JSON format:
{
  "page_no": "1",
  "page_type": "Bill Detail",
  "line_items": [
    {
      "item_name": "Product Name",
      "item_quantity": 2.0,
      "item_rate": 100.50,
      "item_amount": 201.00
    }
  ],
  "extracted_total": 201.00,
  "actual_bill_total": 201.00
}

IMPORTANT RULES:
- Return ONLY valid JSON, no markdown formatting or code blocks.
- If item_rate is not present, set item_rate = 0.0
- If item_quantity is not present, set item_quantity = 0.0
- Item amount must be EXACTLY as shown in the document. No rounding allowed.
- page_type must be exactly one of: "Bill Detail", "Final Bill", "Pharmacy"
- Only extract currency amounts for item_amount (ignore dates, IDs, etc.)"#;

/// Instruction sent (text only) when the first response failed to decode.
const REPAIR_INSTRUCTION: &str = r#"The text below was supposed to be a single JSON object describing the line items of a bill page, but it is not valid JSON.

Repair it and return it as valid JSON with exactly these keys:
  "page_no" (string), "page_type" (one of "Bill Detail", "Final Bill", "Pharmacy"),
  "line_items" (array of objects with "item_name", "item_quantity", "item_rate", "item_amount"),
  "extracted_total" (number), "actual_bill_total" (number).

Rules:
- Keep every value that is present; do not invent new line items.
- Use 0.0 for a missing item_quantity or item_rate, never null.
- Return ONLY the JSON object, with no markdown fences and no commentary."#;

/// Build the text-only repair prompt for a malformed model response.
pub fn repair_prompt(malformed: &str) -> String {
    format!(
        "{}\n\nMalformed text:\n\"\"\"\n{}\n\"\"\"",
        REPAIR_INSTRUCTION, malformed
    )
}
