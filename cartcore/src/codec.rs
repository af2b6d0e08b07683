//! Text codec for the persisted line-item field.
//!
//! An order's line items are stored in a single text column using the
//! grammar
//!
//! ```text
//! blob := "" | item ("#,#" item)*
//! item := <product id> ":" <quantity>
//! ```
//!
//! where both numbers are unsigned decimal digit runs. Neither separator
//! contains a digit and neither contains the other, so every valid blob has
//! exactly one parse. Decoding rejects anything else instead of guessing:
//! a truncated or partially parsed cart would silently corrupt the order.
//!
//! Encoding is canonical: items are written in ascending product id order,
//! so equal sets always produce byte-identical blobs.

use crate::errors::CodecError;
use crate::line_items::{LineItem, LineItems};
use crate::types::{ProductId, Quantity};

/// Separator placed between two items.
pub const ITEM_SEPARATOR: &str = "#,#";

/// Separator placed between the product id and the quantity of one item.
pub const FIELD_SEPARATOR: char = ':';

/// Encoder and decoder for the line-item blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineItemCodec;

impl LineItemCodec {
    /// Encodes line items into their canonical blob.
    ///
    /// An empty set encodes to the empty string.
    pub fn encode(items: &LineItems) -> String {
        let mut blob = String::with_capacity(items.len() * 8);
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                blob.push_str(ITEM_SEPARATOR);
            }
            blob.push_str(&item.product_id.to_string());
            blob.push(FIELD_SEPARATOR);
            blob.push_str(&item.quantity.to_string());
        }
        blob
    }

    /// Decodes a blob produced by [`LineItemCodec::encode`] (or by the legacy
    /// writer sharing the same format).
    ///
    /// # Errors
    ///
    /// - [`CodecError::MalformedItem`] if any segment is not
    ///   `digits ':' digits`, the product id is not positive, the quantity is
    ///   below one, or a number overflows
    /// - [`CodecError::DuplicateProduct`] if a product id repeats
    pub fn decode(blob: &str) -> Result<LineItems, CodecError> {
        if blob.is_empty() {
            return Ok(LineItems::new());
        }

        let mut items = Vec::new();
        for segment in blob.split(ITEM_SEPARATOR) {
            items.push(decode_item(segment)?);
        }

        LineItems::try_from_items(items).map_err(CodecError::DuplicateProduct)
    }

    /// Cheap textual pre-filter: returns true if `blob` may hold a line item
    /// for `product_id`.
    ///
    /// Never returns false for a blob that decodes to a set containing the
    /// product, so backends can use it (or its SQL equivalent) to narrow a scan
    /// before decoding.
    pub fn may_reference(blob: &str, product_id: ProductId) -> bool {
        let needle = format!("{ITEM_SEPARATOR}{product_id}{FIELD_SEPARATOR}");
        format!("{ITEM_SEPARATOR}{blob}").contains(&needle)
    }
}

fn decode_item(segment: &str) -> Result<LineItem, CodecError> {
    let malformed = |reason: &'static str| CodecError::MalformedItem {
        segment: segment.to_string(),
        reason,
    };

    if segment.is_empty() {
        return Err(malformed("empty item"));
    }

    let (product, quantity) = segment
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| malformed("missing ':' between product id and quantity"))?;

    let product = parse_digits::<i64>(product)
        .and_then(|raw| ProductId::try_new(raw).ok())
        .ok_or_else(|| malformed("product id is not a positive integer"))?;

    let quantity = parse_digits::<u32>(quantity)
        .and_then(|raw| Quantity::try_new(raw).ok())
        .ok_or_else(|| malformed("quantity is not an integer of at least 1"))?;

    Ok(LineItem::new(product, quantity))
}

/// Parses a run of ASCII digits. Signs, whitespace and empty input are
/// rejected, which `str::parse` alone would partly accept.
fn parse_digits<T: std::str::FromStr>(field: &str) -> Option<T> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}
