//! The cart service: the interface exposed to callers.
//!
//! Every mutating operation follows the same shape: take the per-cart lock,
//! then inside a retry loop load fresh state, compute the new state with the
//! pure functions from [`merge`](crate::merge) and
//! [`consistency`](crate::consistency), and persist it with a version check.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument};

use crate::config::CartServiceConfig;
use crate::consistency::OrderConsistencyManager;
use crate::errors::{CartError, CartResult, Entity, StoreError};
use crate::line_items::{LineItem, LineItems};
use crate::locks::KeyedLocks;
use crate::merge;
use crate::model::{
    NewProduct, NewUser, Order, OrderDetails, OrderLine, OrderWrite, Product, ProductDetails, User,
};
use crate::retry::{retry_operation, RetryConfig, RetryPolicy};
use crate::store::CartStore;
use crate::types::{CartKey, OrderId, ProductId, StockQuantity, Timestamp, UserId};

/// Cart and order operations over a [`CartStore`].
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct CartService<S> {
    store: S,
    locks: KeyedLocks<CartKey>,
    consistency: OrderConsistencyManager,
    retry: RetryConfig,
    retry_policy: RetryPolicy,
}

impl<S> CartService<S>
where
    S: CartStore + Send + Sync,
{
    /// Creates a service with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, &CartServiceConfig::default())
    }

    /// Creates a service with an explicit configuration.
    pub fn with_config(store: S, config: &CartServiceConfig) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            consistency: OrderConsistencyManager::new(config.paid_order_policy),
            retry: config.retry.to_retry_config(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    // ---------------------------------------------------------------------
    // Catalog
    // ---------------------------------------------------------------------

    /// Adds a product to the catalog. Stock must be positive.
    ///
    /// # Errors
    ///
    /// [`CartError::InvalidStock`] if the initial stock is zero.
    #[instrument(skip(self, product), fields(name = %product.details.name))]
    pub async fn create_product(&self, product: NewProduct) -> CartResult<Product> {
        let stock = product.stock.into_inner();
        if stock <= 0 {
            return Err(CartError::InvalidStock {
                expected: "greater than 0",
                actual: stock,
            });
        }
        let product = self.store.insert_product(product).await?;
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    /// Loads a product.
    ///
    /// # Errors
    ///
    /// [`CartError::NotFound`] if the product does not exist.
    pub async fn product(&self, product_id: ProductId) -> CartResult<Product> {
        self.store
            .find_product(product_id)
            .await?
            .ok_or(CartError::NotFound(Entity::Product(product_id)))
    }

    /// Lists the catalog.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn list_products(&self) -> CartResult<Vec<Product>> {
        Ok(self.store.list_products().await?)
    }

    /// Overwrites the stock of a product.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidStock`] if `amount` is negative
    /// - [`CartError::NotFound`] if the product does not exist
    #[instrument(skip(self))]
    pub async fn set_stock(&self, product_id: ProductId, amount: i64) -> CartResult<Product> {
        let stock = StockQuantity::try_new(amount).map_err(|_| CartError::InvalidStock {
            expected: "at least 0",
            actual: amount,
        })?;
        Ok(self.store.set_stock(product_id, stock).await?)
    }

    /// Replaces the catalog details of a product, keeping its stock.
    ///
    /// # Errors
    ///
    /// [`CartError::NotFound`] if the product does not exist.
    #[instrument(skip(self, details), fields(name = %details.name))]
    pub async fn update_product(
        &self,
        product_id: ProductId,
        details: ProductDetails,
    ) -> CartResult<Product> {
        let product = self.store.update_product(product_id, details).await?;
        info!("product updated");
        Ok(product)
    }

    /// Removes a product and, in the same atomic unit, every reference to it.
    ///
    /// Orders left without items are deleted. A conflicting or failing commit
    /// is retried from a fresh scan. If a failed commit turns out to have been
    /// applied, the retry finds the product gone with nothing left to cascade
    /// and reports success.
    ///
    /// # Errors
    ///
    /// - [`CartError::NotFound`] if the product does not exist
    /// - [`CartError::MalformedItem`] / [`CartError::DuplicateProductInvariantViolation`]
    ///   if a referencing order is corrupt
    /// - [`CartError::ConcurrencyConflict`] once retries are exhausted
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: ProductId) -> CartResult<()> {
        if !self.store.exists(product_id).await? {
            return Err(CartError::NotFound(Entity::Product(product_id)));
        }
        let maybe_committed = AtomicBool::new(false);
        let maybe_committed = &maybe_committed;
        let (updated, deleted) = retry_operation(&self.retry, self.retry_policy, "delete_product", move || {
            self.delete_product_once(product_id, maybe_committed)
        })
        .await?;
        info!(updated, deleted, "product deleted");
        Ok(())
    }

    /// One scan-plan-commit round. `maybe_committed` is set once a commit
    /// failed without telling whether it was applied.
    async fn delete_product_once(
        &self,
        product_id: ProductId,
        maybe_committed: &AtomicBool,
    ) -> CartResult<(usize, usize)> {
        let referencing = self.store.find_all_referencing(product_id).await?;
        let removal = self.consistency.plan_removal(product_id, referencing);
        debug!(
            updates = removal.plan().updates.len(),
            deletions = removal.plan().deletions.len(),
            "cascade planned"
        );

        match self.store.commit_product_removal(&removal).await {
            Ok(()) => Ok((removal.plan().updates.len(), removal.plan().deletions.len())),
            Err(StoreError::NotFound(Entity::Product(_)))
                if removal.plan().is_empty() && maybe_committed.load(Ordering::SeqCst) =>
            {
                info!("product already removed by an earlier attempt");
                Ok((0, 0))
            }
            Err(error) => {
                if matches!(error, StoreError::StoreFailure { .. }) {
                    maybe_committed.store(true, Ordering::SeqCst);
                }
                Err(error.into())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    /// Registers a user.
    ///
    /// # Errors
    ///
    /// [`CartError::Store`] wrapping [`StoreError::UniqueViolation`] if the
    /// username is taken.
    ///
    /// [`StoreError::UniqueViolation`]: crate::errors::StoreError::UniqueViolation
    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn register_user(&self, user: NewUser) -> CartResult<User> {
        let user = self.store.insert_user(user).await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Loads a user.
    ///
    /// # Errors
    ///
    /// [`CartError::NotFound`] if the user does not exist.
    pub async fn user(&self, user_id: UserId) -> CartResult<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or(CartError::NotFound(Entity::User(user_id)))
    }

    /// Sets the avatar reference of a user. An empty string clears it.
    ///
    /// # Errors
    ///
    /// [`CartError::NotFound`] if the user does not exist.
    #[instrument(skip(self, avatar))]
    pub async fn set_avatar(&self, user_id: UserId, avatar: impl Into<String>) -> CartResult<User> {
        let user = self.store.set_avatar(user_id, avatar.into()).await?;
        debug!("avatar updated");
        Ok(user)
    }

    async fn require_user(&self, user_id: UserId) -> CartResult<()> {
        if self.store.user_exists(user_id).await? {
            Ok(())
        } else {
            Err(CartError::NotFound(Entity::User(user_id)))
        }
    }

    // ---------------------------------------------------------------------
    // Cart
    // ---------------------------------------------------------------------

    /// Adds `quantity` units of a product to the user's cart, creating the
    /// cart if needed. Repeated additions of a product accumulate.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`] if `quantity < 1` or the total overflows
    /// - [`CartError::NotFound`] if the user or product does not exist
    /// - [`CartError::MalformedItem`] if the stored cart is corrupt
    /// - [`CartError::ConcurrencyConflict`] once retries are exhausted
    #[instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> CartResult<Order> {
        // Reject bad input before touching storage.
        merge::add_to_cart(None, product_id, quantity)?;

        let key = CartKey::unpaid(user_id);
        let _guard = self.locks.acquire(&key).await;
        retry_operation(&self.retry, self.retry_policy, "add_to_cart", move || {
            self.add_to_cart_once(key, product_id, quantity)
        })
        .await
    }

    async fn add_to_cart_once(
        &self,
        key: CartKey,
        product_id: ProductId,
        quantity: i64,
    ) -> CartResult<Order> {
        self.require_user(key.user_id).await?;
        if !self.store.exists(product_id).await? {
            return Err(CartError::NotFound(Entity::Product(product_id)));
        }

        let cart = self.store.find_by_user_and_paid(key).await?;
        let items = merge::add_to_cart(cart.as_ref().map(|order| &order.items), product_id, quantity)?;

        let write = match cart {
            Some(order) => OrderWrite::UpdateItems {
                id: order.id,
                expected_version: order.version,
                items,
            },
            None => OrderWrite::Create {
                user_id: key.user_id,
                items,
            },
        };
        let created = matches!(write, OrderWrite::Create { .. });
        let order = self.store.save_order(write).await?;
        if created {
            info!(order_id = %order.id, "cart created");
        } else {
            debug!(order_id = %order.id, version = %order.version, "cart updated");
        }
        Ok(order)
    }

    /// Removes `quantity` units of a product from the user's cart.
    ///
    /// Returns the remaining cart, or `None` when the last line item was
    /// removed and the cart deleted.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`] if `quantity < 1`
    /// - [`CartError::NotFound`] if the user has no cart or the cart does not
    ///   hold the product
    #[instrument(skip(self))]
    pub async fn remove_from_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> CartResult<Option<Order>> {
        let key = CartKey::unpaid(user_id);
        let _guard = self.locks.acquire(&key).await;
        retry_operation(&self.retry, self.retry_policy, "remove_from_cart", move || {
            self.remove_from_cart_once(key, product_id, quantity)
        })
        .await
    }

    async fn remove_from_cart_once(
        &self,
        key: CartKey,
        product_id: ProductId,
        quantity: i64,
    ) -> CartResult<Option<Order>> {
        let cart = self
            .store
            .find_by_user_and_paid(key)
            .await?
            .ok_or(CartError::NotFound(Entity::Cart(key.user_id)))?;
        let items = merge::remove_from_cart(&cart.items, product_id, quantity)?;
        self.persist_cart(key, Some(cart), items).await
    }

    /// Replaces the contents of the user's cart.
    ///
    /// An empty `items` deletes the cart. Returns the stored cart, if any.
    ///
    /// # Errors
    ///
    /// - [`CartError::DuplicateProductInvariantViolation`] if a product appears
    ///   twice in `items`
    /// - [`CartError::NotFound`] if the user or a referenced product does not exist
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn replace_cart(&self, user_id: UserId, items: Vec<LineItem>) -> CartResult<Option<Order>> {
        let items = LineItems::try_from_items(items).map_err(|product_id| {
            CartError::DuplicateProductInvariantViolation {
                product_id,
                order_id: None,
            }
        })?;

        let key = CartKey::unpaid(user_id);
        let _guard = self.locks.acquire(&key).await;
        let items = &items;
        retry_operation(&self.retry, self.retry_policy, "replace_cart", move || async move {
            self.require_user(key.user_id).await?;
            let cart = self.store.find_by_user_and_paid(key).await?;
            self.persist_cart(key, cart, items.clone()).await
        })
        .await
    }

    /// Writes `items` as the new content of the cart at `key`, deleting the
    /// cart when `items` is empty.
    async fn persist_cart(
        &self,
        key: CartKey,
        cart: Option<Order>,
        items: LineItems,
    ) -> CartResult<Option<Order>> {
        let write = match (cart, items.is_empty()) {
            (None, true) => return Ok(None),
            (Some(order), true) => {
                self.store.delete_order(order.id, order.version).await?;
                info!(order_id = %order.id, "cart emptied and deleted");
                return Ok(None);
            }
            (Some(order), false) => OrderWrite::UpdateItems {
                id: order.id,
                expected_version: order.version,
                items,
            },
            (None, false) => OrderWrite::Create {
                user_id: key.user_id,
                items,
            },
        };
        Ok(Some(self.store.save_order(write).await?))
    }

    /// Pays the user's cart. The order becomes frozen.
    ///
    /// # Errors
    ///
    /// [`CartError::NothingToPay`] if the user has no cart.
    #[instrument(skip(self))]
    pub async fn pay(&self, user_id: UserId) -> CartResult<Order> {
        let key = CartKey::unpaid(user_id);
        let _guard = self.locks.acquire(&key).await;
        let order = retry_operation(&self.retry, self.retry_policy, "pay", move || async move {
            let cart = self
                .store
                .find_by_user_and_paid(key)
                .await?
                .ok_or(CartError::NothingToPay(user_id))?;
            Ok(self
                .store
                .save_order(OrderWrite::MarkPaid {
                    id: cart.id,
                    expected_version: cart.version,
                    paid_at: Timestamp::now(),
                })
                .await?)
        })
        .await?;
        info!(order_id = %order.id, "order paid");
        Ok(order)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// The user's current cart, if any.
    ///
    /// # Errors
    ///
    /// - [`CartError::NotFound`] if the user does not exist
    /// - [`CartError::MalformedItem`] if the stored cart is corrupt
    pub async fn cart(&self, user_id: UserId) -> CartResult<Option<Order>> {
        self.require_user(user_id).await?;
        Ok(self.store.find_by_user_and_paid(CartKey::unpaid(user_id)).await?)
    }

    /// Every paid order of the user, oldest first.
    ///
    /// # Errors
    ///
    /// [`CartError::NotFound`] if the user does not exist.
    pub async fn paid_orders(&self, user_id: UserId) -> CartResult<Vec<Order>> {
        self.require_user(user_id).await?;
        let key = CartKey {
            user_id,
            paid: true,
        };
        Ok(self.store.find_all_by_user(key).await?)
    }

    /// Loads an order.
    ///
    /// # Errors
    ///
    /// [`CartError::NotFound`] if the order does not exist.
    pub async fn order(&self, order_id: OrderId) -> CartResult<Order> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or(CartError::NotFound(Entity::Order(order_id)))
    }

    /// Every order in the store.
    ///
    /// # Errors
    ///
    /// Propagates store errors, including corrupt orders.
    pub async fn all_orders(&self) -> CartResult<Vec<Order>> {
        Ok(self.store.list_orders().await?)
    }

    /// An order with its line items resolved against the catalog.
    ///
    /// Items whose product no longer exists are left out.
    ///
    /// # Errors
    ///
    /// [`CartError::NotFound`] if the order or its owner does not exist.
    pub async fn order_details(&self, order_id: OrderId) -> CartResult<OrderDetails> {
        let order = self.order(order_id).await?;
        let owner = self.user(order.user_id).await?;
        let mut catalog = BTreeMap::new();
        for product_id in order.items.product_ids() {
            if let Some(product) = self.store.find_product(product_id).await? {
                catalog.insert(product_id, product);
            }
        }
        Ok(resolve(order, owner, &catalog))
    }

    /// Every order, resolved like [`order_details`](Self::order_details).
    ///
    /// Orders whose owner no longer exists are skipped.
    ///
    /// # Errors
    ///
    /// Propagates store errors, including corrupt orders.
    pub async fn all_order_details(&self) -> CartResult<Vec<OrderDetails>> {
        let catalog: BTreeMap<_, _> = self
            .store
            .list_products()
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();
        let mut owners: BTreeMap<UserId, Option<User>> = BTreeMap::new();
        let mut details = Vec::new();

        for order in self.store.list_orders().await? {
            if !owners.contains_key(&order.user_id) {
                let owner = self.store.find_user(order.user_id).await?;
                owners.insert(order.user_id, owner);
            }
            match owners.get(&order.user_id).cloned().flatten() {
                Some(owner) => details.push(resolve(order, owner, &catalog)),
                None => debug!(order_id = %order.id, "order without owner skipped"),
            }
        }
        Ok(details)
    }

    /// Deletes an order if nobody changes it in the meantime.
    ///
    /// # Errors
    ///
    /// - [`CartError::NotFound`] if the order does not exist
    /// - [`CartError::ConcurrencyConflict`] once retries are exhausted
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> CartResult<()> {
        let key = self.order(order_id).await?.key();
        let _guard = self.locks.acquire(&key).await;
        retry_operation(&self.retry, self.retry_policy, "delete_order", move || async move {
            let order = self.order(order_id).await?;
            Ok(self.store.delete_order(order.id, order.version).await?)
        })
        .await?;
        info!("order deleted");
        Ok(())
    }
}

fn resolve(order: Order, owner: User, catalog: &BTreeMap<ProductId, Product>) -> OrderDetails {
    let lines = order
        .items
        .iter()
        .filter_map(|item| {
            catalog.get(&item.product_id).map(|product| OrderLine {
                product: product.clone(),
                quantity: item.quantity,
            })
        })
        .collect();
    OrderDetails {
        id: order.id,
        owner: owner.into(),
        lines,
        paid: order.paid,
    }
}
