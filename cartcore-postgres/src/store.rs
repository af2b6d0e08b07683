//! Repository trait implementations for [`PostgresCartStore`].

use std::collections::BTreeSet;

use cartcore::{
    CartKey, CartStore, Entity, LineItemCodec, LineItems, NewProduct, NewUser, Order, OrderId,
    OrderRepository, OrderVersion, OrderWrite, Product, ProductDetails, ProductId,
    ProductRemoval, ProductRepository, StockQuantity, StoreError, User, UserId, UserRepository,
};
use sqlx::{query, PgConnection, Row};
use tracing::{debug, info, instrument};

use crate::rows::{self, ORDER_COLUMNS, PRODUCT_COLUMNS, USER_COLUMNS};
use crate::{map_sqlx_error, PostgresCartStore};

/// LIKE pattern test matching blobs that may hold an item for `$1`.
///
/// Prefixing the blob with the item separator lets one pattern match the
/// first item as well as every later one.
const REFERENCES_PRODUCT: &str = "'#,#' || items LIKE '%#,#' || $1 || ':%'";

fn non_empty(items: &LineItems) -> Result<(), StoreError> {
    if items.is_empty() {
        return Err(StoreError::InvalidRecord(
            "an order must hold at least one line item".to_string(),
        ));
    }
    Ok(())
}

fn raw_ids<T: Into<i64>>(ids: impl Iterator<Item = T>) -> Vec<i64> {
    ids.map(Into::into).collect()
}

/// Share-locks every product in `items`, failing with the first one missing.
///
/// The lock is held until the surrounding transaction ends, so a concurrent
/// product removal waits for this write to commit.
async fn lock_products(
    conn: &mut PgConnection,
    items: &LineItems,
    operation: &'static str,
) -> Result<(), StoreError> {
    let wanted = raw_ids(items.product_ids());
    let locked = query("SELECT id FROM cartcore_products WHERE id = ANY($1) FOR SHARE")
        .bind(&wanted)
        .fetch_all(&mut *conn)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

    let mut found = BTreeSet::new();
    for row in &locked {
        found.insert(
            row.try_get::<i64, _>("id")
                .map_err(|error| map_sqlx_error(error, operation))?,
        );
    }
    match wanted.into_iter().find(|id| !found.contains(id)) {
        Some(missing) => Err(StoreError::NotFound(Entity::Product(rows::product_id(missing)?))),
        None => Ok(()),
    }
}

/// Locks an order for a cart write and checks it is still the version the
/// caller read and not yet paid.
async fn lock_open_order(
    conn: &mut PgConnection,
    id: OrderId,
    expected_version: OrderVersion,
    operation: &'static str,
) -> Result<(), StoreError> {
    let row = query("SELECT version, paid FROM cartcore_orders WHERE id = $1 FOR UPDATE")
        .bind(i64::from(id))
        .fetch_optional(&mut *conn)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?
        .ok_or(StoreError::NotFound(Entity::Order(id)))?;

    let version = rows::version(
        row.try_get("version")
            .map_err(|error| map_sqlx_error(error, operation))?,
    )?;
    if version != expected_version {
        return Err(StoreError::VersionConflict { order_id: id });
    }
    let paid: bool = row
        .try_get("paid")
        .map_err(|error| map_sqlx_error(error, operation))?;
    if paid {
        return Err(StoreError::OrderFrozen { order_id: id });
    }
    Ok(())
}

impl ProductRepository for PostgresCartStore {
    #[instrument(name = "postgres.exists", skip(self))]
    async fn exists(&self, product_id: ProductId) -> Result<bool, StoreError> {
        query("SELECT EXISTS (SELECT 1 FROM cartcore_products WHERE id = $1)")
            .bind(i64::from(product_id))
            .fetch_one(self.pool())
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|error| map_sqlx_error(error, "exists"))
    }

    #[instrument(name = "postgres.find_product", skip(self))]
    async fn find_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM cartcore_products WHERE id = $1");
        query(&sql)
            .bind(i64::from(product_id))
            .fetch_optional(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "find_product"))?
            .map(|row| rows::product(&row, "find_product"))
            .transpose()
    }

    #[instrument(name = "postgres.insert_product", skip(self, product), fields(name = %product.details.name))]
    async fn insert_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        let details = &product.details;
        let sql = format!(
            "INSERT INTO cartcore_products \
             (name, description, price, brand, blade_length, weight, handle_material, steel_type, stock) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = query(&sql)
            .bind(details.name.as_ref())
            .bind(details.description.as_deref())
            .bind(details.price.into_inner())
            .bind(details.brand.as_ref())
            .bind(details.blade_length.into_inner())
            .bind(details.weight.into_inner())
            .bind(details.handle_material.as_str())
            .bind(details.steel_type.as_str())
            .bind(product.stock.into_inner())
            .fetch_one(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "insert_product"))?;
        rows::product(&row, "insert_product")
    }

    #[instrument(name = "postgres.set_stock", skip(self))]
    async fn set_stock(
        &self,
        product_id: ProductId,
        stock: StockQuantity,
    ) -> Result<Product, StoreError> {
        let sql = format!(
            "UPDATE cartcore_products SET stock = $2 WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        let row = query(&sql)
            .bind(i64::from(product_id))
            .bind(stock.into_inner())
            .fetch_optional(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "set_stock"))?
            .ok_or(StoreError::NotFound(Entity::Product(product_id)))?;
        rows::product(&row, "set_stock")
    }

    #[instrument(name = "postgres.update_product", skip(self, details), fields(name = %details.name))]
    async fn update_product(
        &self,
        product_id: ProductId,
        details: ProductDetails,
    ) -> Result<Product, StoreError> {
        let sql = format!(
            "UPDATE cartcore_products SET name = $2, description = $3, price = $4, brand = $5, \
             blade_length = $6, weight = $7, handle_material = $8, steel_type = $9 \
             WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        let row = query(&sql)
            .bind(i64::from(product_id))
            .bind(details.name.as_ref())
            .bind(details.description.as_deref())
            .bind(details.price.into_inner())
            .bind(details.brand.as_ref())
            .bind(details.blade_length.into_inner())
            .bind(details.weight.into_inner())
            .bind(details.handle_material.as_str())
            .bind(details.steel_type.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "update_product"))?
            .ok_or(StoreError::NotFound(Entity::Product(product_id)))?;
        rows::product(&row, "update_product")
    }

    #[instrument(name = "postgres.list_products", skip(self))]
    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM cartcore_products ORDER BY id");
        let records = query(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "list_products"))?;
        records
            .iter()
            .map(|row| rows::product(row, "list_products"))
            .collect()
    }
}

impl OrderRepository for PostgresCartStore {
    #[instrument(name = "postgres.find_by_user_and_paid", skip(self))]
    async fn find_by_user_and_paid(&self, key: CartKey) -> Result<Option<Order>, StoreError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM cartcore_orders \
             WHERE user_id = $1 AND paid = $2 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        query(&sql)
            .bind(i64::from(key.user_id))
            .bind(key.paid)
            .fetch_optional(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "find_by_user_and_paid"))?
            .map(|row| rows::order(&row, "find_by_user_and_paid"))
            .transpose()
    }

    #[instrument(name = "postgres.find_all_by_user", skip(self))]
    async fn find_all_by_user(&self, key: CartKey) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM cartcore_orders \
             WHERE user_id = $1 AND paid = $2 \
             ORDER BY created_at, id"
        );
        let records = query(&sql)
            .bind(i64::from(key.user_id))
            .bind(key.paid)
            .fetch_all(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "find_all_by_user"))?;
        rows::orders(&records, "find_all_by_user")
    }

    #[instrument(name = "postgres.find_order", skip(self))]
    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM cartcore_orders WHERE id = $1");
        query(&sql)
            .bind(i64::from(order_id))
            .fetch_optional(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "find_order"))?
            .map(|row| rows::order(&row, "find_order"))
            .transpose()
    }

    #[instrument(name = "postgres.find_all_referencing", skip(self))]
    async fn find_all_referencing(&self, product_id: ProductId) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM cartcore_orders WHERE {REFERENCES_PRODUCT} ORDER BY id"
        );
        let records = query(&sql)
            .bind(product_id.to_string())
            .fetch_all(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "find_all_referencing"))?;

        let mut orders = rows::orders(&records, "find_all_referencing")?;
        orders.retain(|order| order.references(product_id));
        Ok(orders)
    }

    #[instrument(name = "postgres.list_orders", skip(self))]
    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM cartcore_orders ORDER BY id");
        let records = query(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "list_orders"))?;
        rows::orders(&records, "list_orders")
    }

    #[instrument(name = "postgres.save_order", skip(self, write))]
    async fn save_order(&self, write: OrderWrite) -> Result<Order, StoreError> {
        const OPERATION: &str = "save_order";

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let row = match write {
            OrderWrite::Create { user_id, items } => {
                non_empty(&items)?;
                let user = query("SELECT 1 FROM cartcore_users WHERE id = $1 FOR SHARE")
                    .bind(i64::from(user_id))
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|error| map_sqlx_error(error, OPERATION))?;
                if user.is_none() {
                    return Err(StoreError::NotFound(Entity::User(user_id)));
                }
                lock_products(&mut *tx, &items, OPERATION).await?;

                let sql = format!(
                    "INSERT INTO cartcore_orders (user_id, items) VALUES ($1, $2) \
                     RETURNING {ORDER_COLUMNS}"
                );
                query(&sql)
                    .bind(i64::from(user_id))
                    .bind(LineItemCodec::encode(&items))
                    .fetch_one(&mut *tx)
                    .await
            }
            OrderWrite::UpdateItems {
                id,
                expected_version,
                items,
            } => {
                non_empty(&items)?;
                // Products before the order, in the same order a removal takes them.
                lock_products(&mut *tx, &items, OPERATION).await?;
                lock_open_order(&mut *tx, id, expected_version, OPERATION).await?;

                let sql = format!(
                    "UPDATE cartcore_orders SET items = $2, version = version + 1 \
                     WHERE id = $1 RETURNING {ORDER_COLUMNS}"
                );
                query(&sql)
                    .bind(i64::from(id))
                    .bind(LineItemCodec::encode(&items))
                    .fetch_one(&mut *tx)
                    .await
            }
            OrderWrite::MarkPaid {
                id,
                expected_version,
                paid_at,
            } => {
                lock_open_order(&mut *tx, id, expected_version, OPERATION).await?;

                let sql = format!(
                    "UPDATE cartcore_orders SET paid = TRUE, paid_at = $2, version = version + 1 \
                     WHERE id = $1 RETURNING {ORDER_COLUMNS}"
                );
                query(&sql)
                    .bind(i64::from(id))
                    .bind(*paid_at.as_datetime())
                    .fetch_one(&mut *tx)
                    .await
            }
        }
        .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let order = rows::order(&row, OPERATION)?;
        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        debug!(order_id = %order.id, version = %order.version, "[postgres.save_order] order written");
        Ok(order)
    }

    #[instrument(name = "postgres.delete_order", skip(self))]
    async fn delete_order(
        &self,
        order_id: OrderId,
        expected_version: OrderVersion,
    ) -> Result<(), StoreError> {
        const OPERATION: &str = "delete_order";

        let result = query("DELETE FROM cartcore_orders WHERE id = $1 AND version = $2")
            .bind(i64::from(order_id))
            .bind(rows::version_param(expected_version)?)
            .execute(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists: bool = query("SELECT EXISTS (SELECT 1 FROM cartcore_orders WHERE id = $1)")
            .bind(i64::from(order_id))
            .fetch_one(self.pool())
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        if exists {
            debug!(order_id = %order_id, "[postgres.delete_order] stale version");
            Err(StoreError::VersionConflict { order_id })
        } else {
            Err(StoreError::NotFound(Entity::Order(order_id)))
        }
    }
}

impl UserRepository for PostgresCartStore {
    #[instrument(name = "postgres.user_exists", skip(self))]
    async fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError> {
        query("SELECT EXISTS (SELECT 1 FROM cartcore_users WHERE id = $1)")
            .bind(i64::from(user_id))
            .fetch_one(self.pool())
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|error| map_sqlx_error(error, "user_exists"))
    }

    #[instrument(name = "postgres.find_user", skip(self))]
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM cartcore_users WHERE id = $1");
        query(&sql)
            .bind(i64::from(user_id))
            .fetch_optional(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "find_user"))?
            .map(|row| rows::user(&row, "find_user"))
            .transpose()
    }

    #[instrument(name = "postgres.insert_user", skip(self, user), fields(username = %user.username))]
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO cartcore_users (username, role) VALUES ($1, $2) RETURNING {USER_COLUMNS}"
        );
        let row = query(&sql)
            .bind(user.username.as_ref())
            .bind(user.role.code())
            .fetch_one(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "insert_user"))?;
        rows::user(&row, "insert_user")
    }

    #[instrument(name = "postgres.set_avatar", skip(self, avatar))]
    async fn set_avatar(&self, user_id: UserId, avatar: String) -> Result<User, StoreError> {
        let sql = format!("UPDATE cartcore_users SET avatar = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = query(&sql)
            .bind(i64::from(user_id))
            .bind(avatar)
            .fetch_optional(self.pool())
            .await
            .map_err(|error| map_sqlx_error(error, "set_avatar"))?
            .ok_or(StoreError::NotFound(Entity::User(user_id)))?;
        rows::user(&row, "set_avatar")
    }
}

impl CartStore for PostgresCartStore {
    #[instrument(
        name = "postgres.commit_product_removal",
        skip(self, removal),
        fields(product_id = %removal.product_id(), orders = removal.plan().len())
    )]
    async fn commit_product_removal(&self, removal: &ProductRemoval) -> Result<(), StoreError> {
        const OPERATION: &str = "commit_product_removal";
        let product_id = removal.product_id();
        let plan = removal.plan();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        // Blocks new cart writes naming the product until this commits.
        let locked = query("SELECT id FROM cartcore_products WHERE id = $1 FOR UPDATE")
            .bind(i64::from(product_id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        if locked.is_none() {
            return Err(StoreError::NotFound(Entity::Product(product_id)));
        }

        // Every order that references the product now, under lock. Writes that
        // committed before the lock was granted are visible here.
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM cartcore_orders WHERE {REFERENCES_PRODUCT} FOR UPDATE"
        );
        let current = query(&sql)
            .bind(product_id.to_string())
            .fetch_all(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        let current = rows::orders(&current, OPERATION)?;

        for planned in plan.orders() {
            let unchanged = current
                .iter()
                .any(|order| order.id == planned.id && order.version == planned.version);
            if !unchanged {
                return Err(StoreError::VersionConflict {
                    order_id: planned.id,
                });
            }
        }
        let covered = current.iter().filter(|order| removal.must_cover(order)).count();
        if covered != plan.len() {
            return Err(StoreError::StaleCascade { product_id });
        }

        query("DELETE FROM cartcore_products WHERE id = $1")
            .bind(i64::from(product_id))
            .execute(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        for update in &plan.updates {
            query("UPDATE cartcore_orders SET items = $2, version = version + 1 WHERE id = $1")
                .bind(i64::from(update.id))
                .bind(LineItemCodec::encode(&update.items))
                .execute(&mut *tx)
                .await
                .map_err(|error| map_sqlx_error(error, OPERATION))?;
        }

        let deletions = raw_ids(plan.deletions.iter().map(|order| order.id));
        if !deletions.is_empty() {
            query("DELETE FROM cartcore_orders WHERE id = ANY($1)")
                .bind(&deletions)
                .execute(&mut *tx)
                .await
                .map_err(|error| map_sqlx_error(error, OPERATION))?;
        }

        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        info!(
            updated = plan.updates.len(),
            deleted = plan.deletions.len(),
            "[postgres.commit_product_removal] cascade committed"
        );
        Ok(())
    }
}
