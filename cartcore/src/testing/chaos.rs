//! Failure injection for cart stores.
//!
//! [`FlakyStore`] wraps any [`CartStore`] and makes writes fail with transient
//! errors, either a fixed number of times or at random with a seeded RNG.
//! A write can also be applied and then reported as failed, the way a commit
//! whose acknowledgement is lost looks to the caller. Reads always pass
//! through, so retry loops observe real state.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use nutype::nutype;
use rand::{Rng, SeedableRng, random, rngs::StdRng};

use crate::consistency::ProductRemoval;
use crate::errors::StoreError;
use crate::model::{NewProduct, NewUser, Order, OrderWrite, Product, ProductDetails, User};
use crate::store::{CartStore, OrderRepository, ProductRepository, UserRepository};
use crate::types::{CartKey, OrderId, OrderVersion, ProductId, StockQuantity, UserId};

/// Probability in `[0.0, 1.0]` of injecting a failure.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// What to inject and how often.
#[derive(Debug, Clone)]
pub struct FlakyConfig {
    seed: Option<u64>,
    failure_probability: Probability,
    conflict_probability: Probability,
    fail_first_writes: u32,
    lose_first_acks: u32,
}

impl FlakyConfig {
    /// A configuration with a fixed RNG seed.
    pub fn deterministic() -> Self {
        Self {
            seed: Some(0),
            ..Self::default()
        }
    }

    /// Fail writes with [`StoreError::StoreFailure`] at this rate.
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Fail writes with a conflict error at this rate.
    #[must_use]
    pub fn with_conflict_probability(mut self, probability: f32) -> Self {
        self.conflict_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Fail the first `count` writes with [`StoreError::StoreFailure`].
    #[must_use]
    pub const fn failing_first_writes(mut self, count: u32) -> Self {
        self.fail_first_writes = count;
        self
    }

    /// Apply the first `count` writes, then report each of them as failed
    /// with [`StoreError::StoreFailure`].
    #[must_use]
    pub const fn losing_first_acks(mut self, count: u32) -> Self {
        self.lose_first_acks = count;
        self
    }
}

impl Default for FlakyConfig {
    fn default() -> Self {
        Self {
            seed: None,
            failure_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
            conflict_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
            fail_first_writes: 0,
            lose_first_acks: 0,
        }
    }
}

enum Injection {
    Failure,
    Conflict,
    LostAck,
}

/// A [`CartStore`] whose writes fail on demand.
#[derive(Debug)]
pub struct FlakyStore<S> {
    store: S,
    config: FlakyConfig,
    rng: Mutex<StdRng>,
    forced_failures: AtomicU32,
    lost_acks: AtomicU32,
    injected: AtomicU32,
}

impl<S> FlakyStore<S> {
    /// Wraps `store`.
    pub fn new(store: S, config: FlakyConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed.unwrap_or_else(random));
        Self {
            forced_failures: AtomicU32::new(config.fail_first_writes),
            lost_acks: AtomicU32::new(config.lose_first_acks),
            store,
            config,
            rng: Mutex::new(rng),
            injected: AtomicU32::new(0),
        }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    /// Number of failures injected so far.
    pub fn injected_failures(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn roll(&self, probability: Probability) -> bool {
        let probability: f32 = probability.into();
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        let mut rng = self
            .rng
            .lock()
            .expect("flaky store RNG mutex should not be poisoned");
        rng.random_bool(f64::from(probability))
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn next_injection(&self) -> Option<Injection> {
        let injection = if Self::take_one(&self.forced_failures) {
            Some(Injection::Failure)
        } else if Self::take_one(&self.lost_acks) {
            Some(Injection::LostAck)
        } else if self.roll(self.config.failure_probability) {
            Some(Injection::Failure)
        } else if self.roll(self.config.conflict_probability) {
            Some(Injection::Conflict)
        } else {
            None
        };

        if injection.is_some() {
            self.injected.fetch_add(1, Ordering::SeqCst);
        }
        injection
    }
}

impl<S> ProductRepository for FlakyStore<S>
where
    S: ProductRepository + Sync,
{
    fn exists(&self, product_id: ProductId) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.store.exists(product_id)
    }

    fn find_product(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<Product>, StoreError>> + Send {
        self.store.find_product(product_id)
    }

    fn insert_product(
        &self,
        product: NewProduct,
    ) -> impl Future<Output = Result<Product, StoreError>> + Send {
        self.store.insert_product(product)
    }

    fn set_stock(
        &self,
        product_id: ProductId,
        stock: StockQuantity,
    ) -> impl Future<Output = Result<Product, StoreError>> + Send {
        self.store.set_stock(product_id, stock)
    }

    fn update_product(
        &self,
        product_id: ProductId,
        details: ProductDetails,
    ) -> impl Future<Output = Result<Product, StoreError>> + Send {
        self.store.update_product(product_id, details)
    }

    fn list_products(&self) -> impl Future<Output = Result<Vec<Product>, StoreError>> + Send {
        self.store.list_products()
    }
}

impl<S> OrderRepository for FlakyStore<S>
where
    S: OrderRepository + Sync,
{
    fn find_by_user_and_paid(
        &self,
        key: CartKey,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send {
        self.store.find_by_user_and_paid(key)
    }

    fn find_all_by_user(
        &self,
        key: CartKey,
    ) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send {
        self.store.find_all_by_user(key)
    }

    fn find_order(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send {
        self.store.find_order(order_id)
    }

    fn find_all_referencing(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send {
        self.store.find_all_referencing(product_id)
    }

    fn list_orders(&self) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send {
        self.store.list_orders()
    }

    fn save_order(
        &self,
        write: OrderWrite,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send {
        let injection = self.next_injection();
        let store = &self.store;

        async move {
            match injection {
                None => store.save_order(write).await,
                Some(Injection::Failure) => Err(StoreError::StoreFailure {
                    operation: "save_order",
                }),
                Some(Injection::LostAck) => {
                    store.save_order(write).await?;
                    Err(StoreError::StoreFailure {
                        operation: "save_order",
                    })
                }
                Some(Injection::Conflict) => Err(match &write {
                    OrderWrite::Create { user_id, .. } => StoreError::UniqueViolation(format!(
                        "user {user_id} already has an unpaid order"
                    )),
                    OrderWrite::UpdateItems { id, .. } | OrderWrite::MarkPaid { id, .. } => {
                        StoreError::VersionConflict { order_id: *id }
                    }
                }),
            }
        }
    }

    fn delete_order(
        &self,
        order_id: OrderId,
        expected_version: OrderVersion,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let injection = self.next_injection();
        let store = &self.store;

        async move {
            match injection {
                Some(Injection::Failure) => Err(StoreError::StoreFailure {
                    operation: "delete_order",
                }),
                Some(Injection::Conflict) => Err(StoreError::VersionConflict { order_id }),
                Some(Injection::LostAck) => {
                    store.delete_order(order_id, expected_version).await?;
                    Err(StoreError::StoreFailure {
                        operation: "delete_order",
                    })
                }
                None => store.delete_order(order_id, expected_version).await,
            }
        }
    }
}

impl<S> UserRepository for FlakyStore<S>
where
    S: UserRepository + Sync,
{
    fn user_exists(&self, user_id: UserId) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.store.user_exists(user_id)
    }

    fn find_user(&self, user_id: UserId) -> impl Future<Output = Result<Option<User>, StoreError>> + Send {
        self.store.find_user(user_id)
    }

    fn insert_user(&self, user: NewUser) -> impl Future<Output = Result<User, StoreError>> + Send {
        self.store.insert_user(user)
    }

    fn set_avatar(
        &self,
        user_id: UserId,
        avatar: String,
    ) -> impl Future<Output = Result<User, StoreError>> + Send {
        self.store.set_avatar(user_id, avatar)
    }
}

impl<S> CartStore for FlakyStore<S>
where
    S: CartStore + Sync,
{
    fn commit_product_removal(
        &self,
        removal: &ProductRemoval,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let injection = self.next_injection();
        let store = &self.store;

        async move {
            match injection {
                Some(Injection::Failure) => Err(StoreError::StoreFailure {
                    operation: "commit_product_removal",
                }),
                Some(Injection::Conflict) => Err(StoreError::StaleCascade {
                    product_id: removal.product_id(),
                }),
                Some(Injection::LostAck) => {
                    store.commit_product_removal(removal).await?;
                    Err(StoreError::StoreFailure {
                        operation: "commit_product_removal",
                    })
                }
                None => store.commit_product_removal(removal).await,
            }
        }
    }
}

/// Adds `.flaky(config)` to every store.
pub trait FlakyStoreExt: Sized {
    /// Wraps `self` in a [`FlakyStore`].
    fn flaky(self, config: FlakyConfig) -> FlakyStore<Self>;
}

impl<S> FlakyStoreExt for S
where
    S: CartStore + Sync,
{
    fn flaky(self, config: FlakyConfig) -> FlakyStore<Self> {
        FlakyStore::new(self, config)
    }
}
