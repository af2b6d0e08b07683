//! Order consistency manager.
//!
//! When a product leaves the catalog every order referencing it must either
//! lose that line item or, if nothing would remain, be deleted. This module
//! only *classifies*; applying the result atomically together with the
//! product deletion is the job of [`CartStore::commit_product_removal`].
//!
//! [`CartStore::commit_product_removal`]: crate::store::CartStore::commit_product_removal

use serde::{Deserialize, Serialize};

use crate::model::Order;
use crate::types::ProductId;

/// How a product removal treats orders that are already paid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidOrderPolicy {
    /// Paid orders are rewritten or deleted like carts.
    #[default]
    Cascade,
    /// Paid orders are left untouched and keep referencing the removed
    /// product.
    Preserve,
}

impl PaidOrderPolicy {
    /// Whether a removal may modify `order`.
    pub const fn applies_to(self, order: &Order) -> bool {
        !order.paid || matches!(self, Self::Cascade)
    }
}

/// Orders affected by a product removal.
///
/// `updates` carry the remaining line items and the version that was read;
/// `deletions` are the orders whose last line item was the removed product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadePlan {
    /// Orders that keep at least one line item.
    pub updates: Vec<Order>,
    /// Orders left without line items.
    pub deletions: Vec<Order>,
}

impl CascadePlan {
    /// Number of orders the plan touches.
    pub fn len(&self) -> usize {
        self.updates.len() + self.deletions.len()
    }

    /// Returns true if no order is affected.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletions.is_empty()
    }

    /// Iterates over every affected order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.updates.iter().chain(self.deletions.iter())
    }
}

/// Classifies `orders` for the removal of `product_id`.
///
/// Orders not referencing the product, and paid orders excluded by `policy`,
/// are dropped from the result.
pub fn on_product_deleted<I>(product_id: ProductId, orders: I, policy: PaidOrderPolicy) -> CascadePlan
where
    I: IntoIterator<Item = Order>,
{
    let mut plan = CascadePlan::default();

    for mut order in orders {
        if !order.references(product_id) || !policy.applies_to(&order) {
            continue;
        }
        order.items.remove(product_id);
        if order.items.is_empty() {
            plan.deletions.push(order);
        } else {
            plan.updates.push(order);
        }
    }

    plan
}

/// A product deletion together with its cascade.
///
/// Stores apply a removal as one atomic unit: the product row, every update
/// and every deletion succeed together or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRemoval {
    product_id: ProductId,
    policy: PaidOrderPolicy,
    plan: CascadePlan,
}

impl ProductRemoval {
    /// The product being removed.
    pub const fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// The paid-order policy the plan was computed under.
    pub const fn policy(&self) -> PaidOrderPolicy {
        self.policy
    }

    /// The classified orders.
    pub const fn plan(&self) -> &CascadePlan {
        &self.plan
    }

    /// Whether a stored order is one the removal must account for.
    ///
    /// A store committing the removal counts the stored orders matching this
    /// predicate; if that count differs from [`CascadePlan::len`] a new order
    /// appeared after the scan and the plan is stale.
    pub fn must_cover(&self, order: &Order) -> bool {
        order.references(self.product_id) && self.policy.applies_to(order)
    }
}

/// Builds [`ProductRemoval`]s under a fixed [`PaidOrderPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderConsistencyManager {
    policy: PaidOrderPolicy,
}

impl OrderConsistencyManager {
    /// Creates a manager applying `policy`.
    pub const fn new(policy: PaidOrderPolicy) -> Self {
        Self { policy }
    }

    /// The policy in effect.
    pub const fn policy(&self) -> PaidOrderPolicy {
        self.policy
    }

    /// Plans the removal of `product_id` given the orders referencing it.
    pub fn plan_removal<I>(&self, product_id: ProductId, orders: I) -> ProductRemoval
    where
        I: IntoIterator<Item = Order>,
    {
        ProductRemoval {
            product_id,
            policy: self.policy,
            plan: on_product_deleted(product_id, orders, self.policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_items::{LineItem, LineItems};
    use crate::testing::generators::{arb_line_items, arb_product_id};
    use crate::types::{OrderId, OrderVersion, Quantity, Timestamp, UserId};
    use proptest::prelude::*;

    fn product(id: i64) -> ProductId {
        ProductId::try_new(id).expect("valid product id")
    }

    fn items(pairs: &[(i64, u32)]) -> LineItems {
        LineItems::try_from_items(pairs.iter().map(|&(id, quantity)| {
            LineItem::new(
                product(id),
                Quantity::try_new(quantity).expect("valid quantity"),
            )
        }))
        .expect("distinct products")
    }

    fn order(id: i64, paid: bool, items: LineItems) -> Order {
        Order {
            id: OrderId::try_new(id).expect("valid order id"),
            user_id: UserId::try_new(id).expect("valid user id"),
            items,
            paid,
            version: OrderVersion::initial(),
            created_at: Timestamp::now(),
            paid_at: None,
        }
    }

    #[test]
    fn order_losing_its_only_item_is_deleted() {
        let plan = on_product_deleted(
            product(5),
            [order(1, false, items(&[(5, 2)]))],
            PaidOrderPolicy::Cascade,
        );

        assert!(plan.updates.is_empty());
        assert_eq!(plan.deletions.len(), 1);
        assert_eq!(plan.deletions[0].id.into_inner(), 1);
    }

    #[test]
    fn order_keeping_other_items_is_updated() {
        let plan = on_product_deleted(
            product(5),
            [order(1, false, items(&[(5, 2), (7, 1)]))],
            PaidOrderPolicy::Cascade,
        );

        assert!(plan.deletions.is_empty());
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].items, items(&[(7, 1)]));
        assert_eq!(plan.updates[0].version, OrderVersion::initial());
    }

    #[test]
    fn unrelated_orders_are_not_returned() {
        let plan = on_product_deleted(
            product(5),
            [order(1, false, items(&[(7, 1)]))],
            PaidOrderPolicy::Cascade,
        );

        assert!(plan.is_empty());
    }

    #[test]
    fn paid_orders_cascade_by_default() {
        let plan = on_product_deleted(
            product(5),
            [order(1, true, items(&[(5, 1), (6, 1)]))],
            PaidOrderPolicy::default(),
        );

        assert_eq!(plan.updates.len(), 1);
    }

    #[test]
    fn preserve_policy_skips_paid_orders() {
        let manager = OrderConsistencyManager::new(PaidOrderPolicy::Preserve);
        let removal = manager.plan_removal(
            product(5),
            [
                order(1, true, items(&[(5, 1)])),
                order(2, false, items(&[(5, 1)])),
            ],
        );

        assert_eq!(removal.plan().len(), 1);
        assert_eq!(removal.plan().deletions[0].id.into_inner(), 2);
        assert!(!removal.must_cover(&order(1, true, items(&[(5, 1)]))));
        assert!(removal.must_cover(&order(3, false, items(&[(5, 4)]))));
    }

    #[test]
    fn mixed_orders_are_split_between_updates_and_deletions() {
        let plan = on_product_deleted(
            product(5),
            [
                order(1, false, items(&[(5, 2)])),
                order(2, true, items(&[(5, 2), (7, 1)])),
                order(3, false, items(&[(7, 1)])),
            ],
            PaidOrderPolicy::Cascade,
        );

        let updated: Vec<i64> = plan.updates.iter().map(|o| o.id.into_inner()).collect();
        let deleted: Vec<i64> = plan.deletions.iter().map(|o| o.id.into_inner()).collect();
        assert_eq!(updated, vec![2]);
        assert_eq!(deleted, vec![1]);
    }

    proptest! {
        /// Property: no planned order references the removed product, and no
        /// planned update is empty.
        #[test]
        fn plans_never_keep_the_removed_product(
            carts in prop::collection::vec(arb_line_items(0..6), 0..10),
            removed in arb_product_id(),
        ) {
            let orders: Vec<Order> = carts
                .into_iter()
                .enumerate()
                .filter(|(_, items)| !items.is_empty())
                .map(|(index, items)| order(i64::try_from(index).expect("small index") + 1, false, items))
                .collect();
            let referencing = orders.iter().filter(|o| o.references(removed)).count();

            let plan = on_product_deleted(removed, orders, PaidOrderPolicy::Cascade);

            prop_assert_eq!(plan.len(), referencing);
            prop_assert!(plan.orders().all(|o| !o.references(removed)));
            prop_assert!(plan.updates.iter().all(|o| !o.items.is_empty()));
        }
    }
}
