//! Line items and the per-order line item set.
//!
//! [`LineItems`] is keyed by [`ProductId`], so an order can never hold two
//! entries for the same product. Iteration is always in ascending product id
//! order, which is also the canonical encoding order.

use std::collections::btree_map::{self, BTreeMap};

use serde::{Deserialize, Serialize};

use crate::types::{ProductId, Quantity};

/// A `(product, quantity)` pair inside an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineItem {
    /// The referenced product.
    pub product_id: ProductId,
    /// Units of the product, always at least one.
    pub quantity: Quantity,
}

impl LineItem {
    /// Creates a new line item.
    pub const fn new(product_id: ProductId, quantity: Quantity) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// The set of line items owned by one order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<LineItem>", try_from = "Vec<LineItem>")]
pub struct LineItems(BTreeMap<ProductId, Quantity>);

impl LineItems {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Creates a set holding a single line item.
    pub fn single(product_id: ProductId, quantity: Quantity) -> Self {
        let mut items = Self::new();
        items.0.insert(product_id, quantity);
        items
    }

    /// Builds a set from line items, returning the first product id that
    /// appears more than once.
    pub fn try_from_items<I>(items: I) -> Result<Self, ProductId>
    where
        I: IntoIterator<Item = LineItem>,
    {
        let mut set = Self::new();
        for item in items {
            if set.0.insert(item.product_id, item.quantity).is_some() {
                return Err(item.product_id);
            }
        }
        Ok(set)
    }

    /// Returns true if the set holds no line items.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of distinct products in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the quantity recorded for `product_id`, if any.
    pub fn quantity_of(&self, product_id: ProductId) -> Option<Quantity> {
        self.0.get(&product_id).copied()
    }

    /// Returns true if the set references `product_id`.
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.0.contains_key(&product_id)
    }

    /// Sum of the quantities of every line item.
    pub fn total_units(&self) -> u64 {
        self.0.values().map(|q| u64::from(q.into_inner())).sum()
    }

    /// Iterates over line items in ascending product id order.
    pub fn iter(&self) -> impl Iterator<Item = LineItem> + '_ {
        self.0
            .iter()
            .map(|(product_id, quantity)| LineItem::new(*product_id, *quantity))
    }

    /// Iterates over the referenced product ids in ascending order.
    pub fn product_ids(&self) -> impl Iterator<Item = ProductId> + '_ {
        self.0.keys().copied()
    }

    pub(crate) fn set(&mut self, product_id: ProductId, quantity: Quantity) {
        self.0.insert(product_id, quantity);
    }

    pub(crate) fn remove(&mut self, product_id: ProductId) -> Option<Quantity> {
        self.0.remove(&product_id)
    }

    pub(crate) fn entry(&mut self, product_id: ProductId) -> btree_map::Entry<'_, ProductId, Quantity> {
        self.0.entry(product_id)
    }
}

impl From<LineItems> for Vec<LineItem> {
    fn from(items: LineItems) -> Self {
        items.iter().collect()
    }
}

impl TryFrom<Vec<LineItem>> for LineItems {
    type Error = String;

    fn try_from(items: Vec<LineItem>) -> Result<Self, Self::Error> {
        Self::try_from_items(items)
            .map_err(|product_id| format!("product {product_id} appears more than once"))
    }
}
