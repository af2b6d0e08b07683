//! Error types for cartcore.
//!
//! Errors are layered the same way the crate is:
//!
//! - **CodecError**: a persisted line-item blob cannot be decoded
//! - **MergeError**: a cart mutation was rejected before anything changed
//! - **StoreError**: storage and persistence failures
//! - **CartError**: what the service layer reports upward
//!
//! Codec and merge errors are raised by pure functions, so no side effect has
//! happened when they surface. Store errors classify themselves as retryable
//! or permanent via [`StoreError::is_retryable`].

use thiserror::Error;

use crate::types::{OrderId, ProductId, UserId};

/// Errors raised while decoding a persisted line-item blob.
///
/// Both variants indicate corruption upstream of the decoder. They are always
/// surfaced, never repaired silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A segment is not of the form `<product id>:<quantity>` with a positive
    /// product id and a quantity of at least one.
    #[error("malformed line item {segment:?}: {reason}")]
    MalformedItem {
        /// The offending segment, verbatim.
        segment: String,
        /// Why the segment was rejected.
        reason: &'static str,
    },

    /// The same product appears twice in one blob.
    #[error("product {0} appears more than once in the line items")]
    DuplicateProduct(ProductId),
}

/// Errors raised by the cart merge engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// The requested quantity is below one.
    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(i64),

    /// Accumulating the quantity would exceed the representable range.
    #[error("quantity for product {0} would overflow")]
    QuantityOverflow(ProductId),

    /// A removal referenced a product the cart does not hold.
    #[error("product {0} is not in the cart")]
    NotInCart(ProductId),
}

/// Kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// A catalog product.
    Product(ProductId),
    /// A registered user.
    User(UserId),
    /// An order addressed by id.
    Order(OrderId),
    /// The unpaid order of a user.
    Cart(UserId),
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Product(id) => write!(f, "product {id}"),
            Self::User(id) => write!(f, "user {id}"),
            Self::Order(id) => write!(f, "order {id}"),
            Self::Cart(id) => write!(f, "cart of user {id}"),
        }
    }
}

/// Errors that can occur when interacting with a cart store.
///
/// # Retry Strategy
///
/// - **VersionConflict**: another writer changed the order, reload and retry
/// - **StaleCascade**: a cascade plan missed a new order, rescan and retry
/// - **UniqueViolation**: a concurrent writer created the same record, reload and retry
/// - **StoreFailure**: transient backend failure, retry from a fresh read
/// - everything else is permanent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{0} not found")]
    NotFound(Entity),

    /// The order changed between read and write.
    #[error("version conflict on order {order_id}")]
    VersionConflict {
        /// The order whose stored version no longer matches.
        order_id: OrderId,
    },

    /// An order referencing a product appeared after the cascade plan was
    /// computed.
    #[error("orders referencing product {product_id} changed during removal")]
    StaleCascade {
        /// The product being removed.
        product_id: ProductId,
    },

    /// A paid order was addressed by a cart mutation.
    #[error("order {order_id} is paid and can no longer change")]
    OrderFrozen {
        /// The paid order.
        order_id: OrderId,
    },

    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A stored order holds a line-item blob that cannot be decoded.
    #[error("order {order_id} holds corrupt line items: {source}")]
    CorruptOrder {
        /// The order whose blob failed to decode.
        order_id: OrderId,
        /// The decoding failure.
        #[source]
        source: CodecError,
    },

    /// A stored row holds a value outside its domain type.
    #[error("invalid stored value: {0}")]
    InvalidRecord(String),

    /// Infrastructure failure surfaced by the backing store.
    #[error("{operation} operation failed")]
    StoreFailure {
        /// The operation that failed.
        operation: &'static str,
    },

    /// Database driver error.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether repeating the operation from a fresh read may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. }
                | Self::StaleCascade { .. }
                | Self::UniqueViolation(_)
                | Self::StoreFailure { .. }
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the cart service to its callers.
///
/// # Error Handling Strategy
///
/// - **MalformedItem** / **DuplicateProductInvariantViolation**: stored data is corrupt, investigate
/// - **InvalidQuantity** / **InvalidStock**: fix the input
/// - **NotFound**: the caller referenced something that does not exist (404-class)
/// - **NothingToPay**: the user has no open cart to check out
/// - **ConcurrencyConflict**: retries were exhausted, the caller may try again later
/// - **Store**: handle based on the wrapped store error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// A stored line-item blob could not be parsed.
    #[error("malformed line item in order {order_id}: {segment:?} ({reason})")]
    MalformedItem {
        /// The order holding the corrupt blob.
        order_id: OrderId,
        /// The offending segment.
        segment: String,
        /// Why the segment was rejected.
        reason: &'static str,
    },

    /// A stored order, or an incoming replacement cart, lists one product twice.
    #[error("product {product_id} appears more than once")]
    DuplicateProductInvariantViolation {
        /// The repeated product.
        product_id: ProductId,
        /// The stored order, when the duplicate came from storage.
        order_id: Option<OrderId>,
    },

    /// A cart quantity was rejected before mutation.
    #[error(transparent)]
    InvalidQuantity(MergeError),

    /// A stock amount was negative.
    #[error("stock must be {expected}, got {actual}")]
    InvalidStock {
        /// Human readable constraint.
        expected: &'static str,
        /// The rejected value.
        actual: i64,
    },

    /// A referenced user, product or order does not exist.
    #[error("{0} not found")]
    NotFound(Entity),

    /// The user has no unpaid order to pay.
    #[error("user {0} has no unpaid order")]
    NothingToPay(UserId),

    /// Retries were exhausted on a conflicting or failing store.
    #[error("gave up after {attempts} attempts: {last}")]
    ConcurrencyConflict {
        /// Number of attempts made.
        attempts: u32,
        /// The last retryable error observed.
        last: StoreError,
    },

    /// A permanent store error.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<MergeError> for CartError {
    fn from(error: MergeError) -> Self {
        match error {
            MergeError::NotInCart(product_id) => Self::NotFound(Entity::Product(product_id)),
            other => Self::InvalidQuantity(other),
        }
    }
}

impl From<StoreError> for CartError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(entity) => Self::NotFound(entity),
            StoreError::CorruptOrder {
                order_id,
                source: CodecError::MalformedItem { segment, reason },
            } => Self::MalformedItem {
                order_id,
                segment,
                reason,
            },
            StoreError::CorruptOrder {
                order_id,
                source: CodecError::DuplicateProduct(product_id),
            } => Self::DuplicateProductInvariantViolation {
                product_id,
                order_id: Some(order_id),
            },
            other => Self::Store(other),
        }
    }
}

/// Result type for service operations.
pub type CartResult<T> = Result<T, CartError>;
