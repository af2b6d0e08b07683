//! Cart merge engine.
//!
//! Pure functions that compute the next contents of a cart. Callers load the
//! current cart, call into this module, then persist the result; nothing here
//! touches storage.

use std::collections::btree_map::Entry;

use crate::errors::MergeError;
use crate::line_items::LineItems;
use crate::types::{ProductId, Quantity};

/// Validates a caller-supplied quantity.
fn requested_quantity(quantity: i64) -> Result<Quantity, MergeError> {
    u32::try_from(quantity)
        .ok()
        .and_then(|raw| Quantity::try_new(raw).ok())
        .ok_or(MergeError::InvalidQuantity(quantity))
}

/// Merges `quantity` units of `product_id` into an existing cart.
///
/// - no existing cart: the result holds the single new line item
/// - product already present: its quantity is increased by `quantity`
/// - otherwise: the new line item is added alongside the existing ones
///
/// Entries are never removed or overwritten here.
///
/// # Errors
///
/// - [`MergeError::InvalidQuantity`] if `quantity < 1` (or beyond `u32`)
/// - [`MergeError::QuantityOverflow`] if accumulation would overflow
pub fn add_to_cart(
    existing: Option<&LineItems>,
    product_id: ProductId,
    quantity: i64,
) -> Result<LineItems, MergeError> {
    let quantity = requested_quantity(quantity)?;

    let Some(existing) = existing else {
        return Ok(LineItems::single(product_id, quantity));
    };

    let mut merged = existing.clone();
    match merged.entry(product_id) {
        Entry::Occupied(mut entry) => {
            let total = entry
                .get()
                .checked_add(quantity)
                .ok_or(MergeError::QuantityOverflow(product_id))?;
            entry.insert(total);
        }
        Entry::Vacant(entry) => {
            entry.insert(quantity);
        }
    }
    Ok(merged)
}

/// Removes `quantity` units of `product_id` from a cart.
///
/// When the remaining quantity would be zero or less the line item is dropped
/// entirely, so no zero-quantity item can exist. The result may be empty, in
/// which case the caller must delete the order rather than persist it.
///
/// # Errors
///
/// - [`MergeError::InvalidQuantity`] if `quantity < 1`
/// - [`MergeError::NotInCart`] if the cart does not hold `product_id`
pub fn remove_from_cart(
    existing: &LineItems,
    product_id: ProductId,
    quantity: i64,
) -> Result<LineItems, MergeError> {
    let quantity = requested_quantity(quantity)?;

    let mut reduced = existing.clone();
    let current = reduced
        .remove(product_id)
        .ok_or(MergeError::NotInCart(product_id))?;

    if let Some(rest) = current.checked_sub(quantity) {
        reduced.set(product_id, rest);
    }
    Ok(reduced)
}
