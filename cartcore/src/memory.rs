//! In-memory cart store.
//!
//! Orders are kept as rows holding the encoded line-item blob, exactly as a
//! relational backend stores them, so every read goes through
//! [`LineItemCodec::decode`] and corrupt rows surface the same way.
//!
//! All tables sit behind one mutex. Each trait call takes the lock once, which
//! makes every call (including [`CartStore::commit_product_removal`]) atomic.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::codec::LineItemCodec;
use crate::consistency::ProductRemoval;
use crate::errors::{Entity, StoreError};
use crate::line_items::LineItems;
use crate::model::{NewProduct, NewUser, Order, OrderWrite, Product, ProductDetails, User};
use crate::store::{CartStore, OrderRepository, ProductRepository, UserRepository};
use crate::types::{
    CartKey, OrderId, OrderVersion, ProductId, StockQuantity, Timestamp, UserId,
};

#[derive(Debug, Clone)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    paid: bool,
    items: String,
    version: OrderVersion,
    created_at: Timestamp,
    paid_at: Option<Timestamp>,
}

impl OrderRow {
    fn decode(&self) -> Result<Order, StoreError> {
        let items = LineItemCodec::decode(&self.items).map_err(|source| StoreError::CorruptOrder {
            order_id: self.id,
            source,
        })?;
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            items,
            paid: self.paid,
            version: self.version,
            created_at: self.created_at,
            paid_at: self.paid_at,
        })
    }

    fn may_reference(&self, product_id: ProductId) -> bool {
        LineItemCodec::may_reference(&self.items, product_id)
    }
}

#[derive(Debug, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    users: BTreeMap<UserId, User>,
    orders: BTreeMap<OrderId, OrderRow>,
    last_product_id: i64,
    last_user_id: i64,
    last_order_id: i64,
}

fn next_id<T, E: std::fmt::Display>(
    counter: &mut i64,
    make: impl FnOnce(i64) -> Result<T, E>,
) -> Result<T, StoreError> {
    *counter += 1;
    make(*counter).map_err(|error| StoreError::InvalidRecord(error.to_string()))
}

impl Tables {
    fn require_products(&self, items: &LineItems) -> Result<(), StoreError> {
        match items.product_ids().find(|id| !self.products.contains_key(id)) {
            Some(missing) => Err(StoreError::NotFound(Entity::Product(missing))),
            None => Ok(()),
        }
    }

    fn rows_of(&self, key: CartKey) -> impl Iterator<Item = &OrderRow> {
        self.orders
            .values()
            .filter(move |row| row.user_id == key.user_id && row.paid == key.paid)
    }

    fn checked_row(
        &mut self,
        id: OrderId,
        expected_version: OrderVersion,
    ) -> Result<&mut OrderRow, StoreError> {
        let row = self
            .orders
            .get_mut(&id)
            .ok_or(StoreError::NotFound(Entity::Order(id)))?;
        if row.version != expected_version {
            return Err(StoreError::VersionConflict { order_id: id });
        }
        if row.paid {
            return Err(StoreError::OrderFrozen { order_id: id });
        }
        Ok(row)
    }

    fn create_order(&mut self, user_id: UserId, items: &LineItems) -> Result<OrderId, StoreError> {
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(Entity::User(user_id)));
        }
        if self.rows_of(CartKey::unpaid(user_id)).next().is_some() {
            return Err(StoreError::UniqueViolation(format!(
                "user {user_id} already has an unpaid order"
            )));
        }
        self.require_products(items)?;

        let id = next_id(&mut self.last_order_id, OrderId::try_new)?;
        self.orders.insert(
            id,
            OrderRow {
                id,
                user_id,
                paid: false,
                items: LineItemCodec::encode(items),
                version: OrderVersion::initial(),
                created_at: Timestamp::now(),
                paid_at: None,
            },
        );
        Ok(id)
    }
}

fn non_empty(items: &LineItems) -> Result<(), StoreError> {
    if items.is_empty() {
        return Err(StoreError::InvalidRecord(
            "an order must hold at least one line item".to_string(),
        ));
    }
    Ok(())
}

/// In-memory implementation of [`CartStore`].
///
/// Intended for tests and development. Data lives as long as the value.
#[derive(Debug, Default)]
pub struct InMemoryCartStore {
    tables: Mutex<Tables>,
}

impl InMemoryCartStore {
    /// Creates an empty store. Generated ids start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self, operation: &'static str) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::StoreFailure { operation })
    }

    /// Inserts an order row holding `blob` verbatim, bypassing every check.
    ///
    /// Used to simulate rows corrupted by an earlier writer.
    #[cfg(any(test, feature = "testing"))]
    pub fn insert_raw_order(&self, user_id: UserId, paid: bool, blob: &str) -> Result<OrderId, StoreError> {
        let mut tables = self.tables("insert_raw_order")?;
        let id = next_id(&mut tables.last_order_id, OrderId::try_new)?;
        let now = Timestamp::now();
        tables.orders.insert(
            id,
            OrderRow {
                id,
                user_id,
                paid,
                items: blob.to_string(),
                version: OrderVersion::initial(),
                created_at: now,
                paid_at: paid.then_some(now),
            },
        );
        Ok(id)
    }
}

impl ProductRepository for InMemoryCartStore {
    async fn exists(&self, product_id: ProductId) -> Result<bool, StoreError> {
        Ok(self.tables("exists")?.products.contains_key(&product_id))
    }

    async fn find_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.tables("find_product")?.products.get(&product_id).cloned())
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        let mut tables = self.tables("insert_product")?;
        let id = next_id(&mut tables.last_product_id, ProductId::try_new)?;
        let product = Product {
            id,
            details: product.details,
            stock: product.stock,
        };
        tables.products.insert(id, product.clone());
        Ok(product)
    }

    async fn set_stock(
        &self,
        product_id: ProductId,
        stock: StockQuantity,
    ) -> Result<Product, StoreError> {
        let mut tables = self.tables("set_stock")?;
        let product = tables
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::NotFound(Entity::Product(product_id)))?;
        product.stock = stock;
        Ok(product.clone())
    }

    async fn update_product(
        &self,
        product_id: ProductId,
        details: ProductDetails,
    ) -> Result<Product, StoreError> {
        let mut tables = self.tables("update_product")?;
        let product = tables
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::NotFound(Entity::Product(product_id)))?;
        product.details = details;
        Ok(product.clone())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self
            .tables("list_products")?
            .products
            .values()
            .cloned()
            .collect())
    }
}

impl OrderRepository for InMemoryCartStore {
    async fn find_by_user_and_paid(&self, key: CartKey) -> Result<Option<Order>, StoreError> {
        let tables = self.tables("find_by_user_and_paid")?;
        tables
            .rows_of(key)
            .max_by_key(|row| (row.created_at, row.id))
            .map(OrderRow::decode)
            .transpose()
    }

    async fn find_all_by_user(&self, key: CartKey) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables("find_all_by_user")?;
        tables.rows_of(key).map(OrderRow::decode).collect()
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let tables = self.tables("find_order")?;
        tables.orders.get(&order_id).map(OrderRow::decode).transpose()
    }

    async fn find_all_referencing(&self, product_id: ProductId) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables("find_all_referencing")?;
        let mut orders = Vec::new();
        for row in tables.orders.values().filter(|row| row.may_reference(product_id)) {
            let order = row.decode()?;
            if order.references(product_id) {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables("list_orders")?;
        tables.orders.values().map(OrderRow::decode).collect()
    }

    async fn save_order(&self, write: OrderWrite) -> Result<Order, StoreError> {
        let mut tables = self.tables("save_order")?;

        let id = match write {
            OrderWrite::Create { user_id, items } => {
                non_empty(&items)?;
                tables.create_order(user_id, &items)?
            }
            OrderWrite::UpdateItems {
                id,
                expected_version,
                items,
            } => {
                non_empty(&items)?;
                tables.require_products(&items)?;
                let row = tables.checked_row(id, expected_version)?;
                row.items = LineItemCodec::encode(&items);
                row.version = row.version.next();
                id
            }
            OrderWrite::MarkPaid {
                id,
                expected_version,
                paid_at,
            } => {
                let row = tables.checked_row(id, expected_version)?;
                row.paid = true;
                row.paid_at = Some(paid_at);
                row.version = row.version.next();
                id
            }
        };

        tables
            .orders
            .get(&id)
            .ok_or(StoreError::NotFound(Entity::Order(id)))?
            .decode()
    }

    async fn delete_order(
        &self,
        order_id: OrderId,
        expected_version: OrderVersion,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables("delete_order")?;
        let row = tables
            .orders
            .get(&order_id)
            .ok_or(StoreError::NotFound(Entity::Order(order_id)))?;
        if row.version != expected_version {
            return Err(StoreError::VersionConflict { order_id });
        }
        tables.orders.remove(&order_id);
        Ok(())
    }
}

impl UserRepository for InMemoryCartStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.tables("user_exists")?.users.contains_key(&user_id))
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables("find_user")?.users.get(&user_id).cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables("insert_user")?;
        if tables.users.values().any(|existing| existing.username == user.username) {
            return Err(StoreError::UniqueViolation(format!(
                "username {} is taken",
                user.username
            )));
        }
        let id = next_id(&mut tables.last_user_id, UserId::try_new)?;
        let user = User {
            id,
            username: user.username,
            role: user.role,
            avatar: String::new(),
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn set_avatar(&self, user_id: UserId, avatar: String) -> Result<User, StoreError> {
        let mut tables = self.tables("set_avatar")?;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound(Entity::User(user_id)))?;
        user.avatar = avatar;
        Ok(user.clone())
    }
}

impl CartStore for InMemoryCartStore {
    async fn commit_product_removal(&self, removal: &ProductRemoval) -> Result<(), StoreError> {
        let mut tables = self.tables("commit_product_removal")?;
        let product_id = removal.product_id();

        if !tables.products.contains_key(&product_id) {
            return Err(StoreError::NotFound(Entity::Product(product_id)));
        }

        // Validate everything before the first mutation.
        for planned in removal.plan().orders() {
            match tables.orders.get(&planned.id) {
                Some(row) if row.version == planned.version => {}
                _ => {
                    return Err(StoreError::VersionConflict {
                        order_id: planned.id,
                    })
                }
            }
        }

        let mut covered = 0;
        for row in tables.orders.values().filter(|row| row.may_reference(product_id)) {
            if removal.must_cover(&row.decode()?) {
                covered += 1;
            }
        }
        if covered != removal.plan().len() {
            return Err(StoreError::StaleCascade { product_id });
        }

        tables.products.remove(&product_id);
        for update in &removal.plan().updates {
            if let Some(row) = tables.orders.get_mut(&update.id) {
                row.items = LineItemCodec::encode(&update.items);
                row.version = row.version.next();
            }
        }
        for deletion in &removal.plan().deletions {
            tables.orders.remove(&deletion.id);
        }

        Ok(())
    }
}
