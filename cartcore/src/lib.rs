//! # cartcore
//!
//! Order and cart management core for a small retail catalog.
//!
//! Orders store their line items as a single delimited text field. This crate
//! owns everything that touches that field:
//!
//! - [`codec`]: the `id:qty#,#id:qty` line-item encoding, with strict decoding
//! - [`merge`]: pure cart arithmetic (accumulating additions, removals)
//! - [`consistency`]: classification of orders when a product is removed
//!
//! Around that core sit the repository traits in [`store`], an
//! [`InMemoryCartStore`](memory::InMemoryCartStore), and the [`CartService`]
//! that serializes cart writes per user and retries conflicting writes.
//!
//! ```rust
//! use cartcore::{CartService, InMemoryCartStore};
//! use cartcore::testing::fixtures::{knife, shopper};
//!
//! # tokio_test::block_on(async {
//! let service = CartService::new(InMemoryCartStore::new());
//! let user = service.register_user(shopper("ana")).await?;
//! let gyuto = service.create_product(knife("Gyuto")).await?;
//!
//! service.add_to_cart(user.id, gyuto.id, 2).await?;
//! let cart = service.add_to_cart(user.id, gyuto.id, 3).await?;
//! assert_eq!(cart.items.total_units(), 5);
//!
//! service.delete_product(gyuto.id).await?;
//! assert!(service.cart(user.id).await?.is_none());
//! # Ok::<(), cartcore::CartError>(())
//! # }).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod consistency;
pub mod errors;
pub mod line_items;
pub mod locks;
pub mod memory;
pub mod merge;
pub mod model;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use codec::LineItemCodec;
pub use config::CartServiceConfig;
pub use consistency::{
    on_product_deleted, CascadePlan, OrderConsistencyManager, PaidOrderPolicy, ProductRemoval,
};
pub use errors::{CartError, CartResult, CodecError, Entity, MergeError, StoreError, StoreResult};
pub use line_items::{LineItem, LineItems};
pub use memory::InMemoryCartStore;
pub use model::{
    NewProduct, NewUser, Order, OrderDetails, OrderLine, OrderOwner, OrderWrite, Product,
    ProductDetails, Role, User,
};
pub use service::CartService;
pub use store::{CartStore, OrderRepository, ProductRepository, UserRepository};
pub use types::{
    CartKey, OrderId, OrderVersion, ProductId, Quantity, StockQuantity, Timestamp, UserId,
};
