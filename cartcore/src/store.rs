//! Repository traits for carts, orders, products and users.
//!
//! The traits are deliberately CRUD-only: merging, classification and retry
//! live above them. Backends guarantee the atomicity of each single call,
//! which is all the service relies on.
//!
//! Implementations include:
//! - [`InMemoryCartStore`](crate::memory::InMemoryCartStore) for tests and development
//! - `cartcore-postgres`: PostgreSQL backend using transactions

use std::future::Future;

use crate::consistency::ProductRemoval;
use crate::errors::StoreError;
use crate::model::{NewProduct, NewUser, Order, OrderWrite, Product, ProductDetails, User};
use crate::types::{CartKey, OrderId, OrderVersion, ProductId, StockQuantity, UserId};

/// Catalog storage.
pub trait ProductRepository {
    /// Returns true if the product exists.
    fn exists(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Loads a product.
    fn find_product(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<Product>, StoreError>> + Send;

    /// Inserts a product and returns it with its generated id.
    fn insert_product(
        &self,
        product: NewProduct,
    ) -> impl Future<Output = Result<Product, StoreError>> + Send;

    /// Overwrites the stock of a product.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the product does not exist.
    fn set_stock(
        &self,
        product_id: ProductId,
        stock: StockQuantity,
    ) -> impl Future<Output = Result<Product, StoreError>> + Send;

    /// Replaces the catalog details of a product. Stock is left as it is.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the product does not exist.
    fn update_product(
        &self,
        product_id: ProductId,
        details: ProductDetails,
    ) -> impl Future<Output = Result<Product, StoreError>> + Send;

    /// Lists every product in ascending id order.
    fn list_products(&self) -> impl Future<Output = Result<Vec<Product>, StoreError>> + Send;
}

/// Order storage with optimistic concurrency control.
pub trait OrderRepository {
    /// Loads the order addressed by `key`, if any.
    ///
    /// For an unpaid key this is the user's cart. A user may hold several
    /// paid orders; for a paid key the most recently created one is returned.
    fn find_by_user_and_paid(
        &self,
        key: CartKey,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Loads every order of a user with the given paid flag, oldest first.
    fn find_all_by_user(
        &self,
        key: CartKey,
    ) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send;

    /// Loads an order by id.
    fn find_order(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Loads every order (paid or not) holding a line item for `product_id`.
    fn find_all_referencing(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send;

    /// Lists every order in ascending id order.
    fn list_orders(&self) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send;

    /// Applies a write and returns the stored order.
    ///
    /// Within the same atomic unit the store verifies:
    ///
    /// - the expected version of an existing order (else
    ///   [`StoreError::VersionConflict`])
    /// - that no second unpaid order is created for a user (else
    ///   [`StoreError::UniqueViolation`])
    /// - that every referenced product exists (else [`StoreError::NotFound`])
    /// - that item writes never target a paid order (else
    ///   [`StoreError::OrderFrozen`])
    fn save_order(
        &self,
        write: OrderWrite,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// Deletes an order if it is still at `expected_version`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the order does not exist
    /// - [`StoreError::VersionConflict`] if the order changed since it was read
    fn delete_order(
        &self,
        order_id: OrderId,
        expected_version: OrderVersion,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// User storage.
pub trait UserRepository {
    /// Returns true if the user exists.
    fn user_exists(&self, user_id: UserId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Loads a user.
    fn find_user(&self, user_id: UserId) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Registers a user.
    ///
    /// # Errors
    ///
    /// [`StoreError::UniqueViolation`] if the username is taken.
    fn insert_user(&self, user: NewUser) -> impl Future<Output = Result<User, StoreError>> + Send;

    /// Replaces the avatar reference of a user.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the user does not exist.
    fn set_avatar(
        &self,
        user_id: UserId,
        avatar: String,
    ) -> impl Future<Output = Result<User, StoreError>> + Send;
}

/// A complete cart backend.
///
/// Adds the one write spanning several records: removing a product together
/// with its cascade.
pub trait CartStore: ProductRepository + OrderRepository + UserRepository {
    /// Deletes the product and applies every planned order update and
    /// deletion atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the product no longer exists
    /// - [`StoreError::VersionConflict`] if a planned order changed since the scan
    /// - [`StoreError::StaleCascade`] if an order the plan does not know about
    ///   now references the product
    ///
    /// Nothing is written when an error is returned.
    fn commit_product_removal(
        &self,
        removal: &ProductRemoval,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
