//! Property test generators for domain types.
//!
//! Each generator respects the validation rules of its type.

use std::ops::Range;

use proptest::prelude::*;

use crate::line_items::{LineItem, LineItems};
use crate::types::{ProductId, Quantity, UserId};

/// Generates valid `ProductId` values.
///
/// Ids stay small so independently generated carts share products often.
pub fn arb_product_id() -> impl Strategy<Value = ProductId> {
    (1i64..=64).prop_filter_map("Invalid ProductId", |id| ProductId::try_new(id).ok())
}

/// Generates product ids across the whole positive `i64` range.
pub fn arb_wide_product_id() -> impl Strategy<Value = ProductId> {
    (1i64..=i64::MAX).prop_filter_map("Invalid ProductId", |id| ProductId::try_new(id).ok())
}

/// Generates valid `UserId` values.
pub fn arb_user_id() -> impl Strategy<Value = UserId> {
    (1i64..=10_000).prop_filter_map("Invalid UserId", |id| UserId::try_new(id).ok())
}

/// Generates valid `Quantity` values, including the extremes.
pub fn arb_quantity() -> impl Strategy<Value = Quantity> {
    prop_oneof![
        8 => 1u32..=100,
        1 => Just(u32::MAX),
        1 => 1u32..=u32::MAX,
    ]
    .prop_filter_map("Invalid Quantity", |q| Quantity::try_new(q).ok())
}

/// Generates a line item.
pub fn arb_line_item() -> impl Strategy<Value = LineItem> {
    (prop_oneof![arb_product_id(), arb_wide_product_id()], arb_quantity())
        .prop_map(|(product_id, quantity)| LineItem::new(product_id, quantity))
}

/// Generates a line item set whose size falls in `size`.
///
/// Products are unique by construction.
pub fn arb_line_items(size: Range<usize>) -> impl Strategy<Value = LineItems> {
    prop::collection::btree_map(
        prop_oneof![arb_product_id(), arb_wide_product_id()],
        arb_quantity(),
        size,
    )
    .prop_map(|map| {
        LineItems::try_from_items(
            map.into_iter()
                .map(|(product_id, quantity)| LineItem::new(product_id, quantity)),
        )
        .unwrap_or_default()
    })
}
