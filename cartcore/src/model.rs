//! Catalog, user and order records.

use nutype::nutype;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::line_items::LineItems;
use crate::types::{
    CartKey, OrderId, OrderVersion, ProductId, Quantity, StockQuantity, Timestamp, UserId,
};

/// Display name of a product.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ProductName(String);

/// Brand a product is sold under.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Brand(String);

/// Unit price of a product. Always strictly positive.
#[nutype(
    validate(predicate = |price: &Decimal| price.is_sign_positive() && !price.is_zero()),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Price(Decimal);

/// A strictly positive, finite physical measurement (blade length, weight).
#[nutype(
    validate(finite, greater = 0.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Serialize, Deserialize)
)]
pub struct Measure(f64);

/// Login name of a user.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Username(String);

/// Material of a knife handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleMaterial {
    /// Wooden handle.
    Wood,
    /// Plastic handle.
    Plastic,
    /// Metal handle.
    Metal,
    /// Rubber handle.
    Rubber,
    /// Carbon fiber handle.
    CarbonFiber,
}

/// Steel (or blade material) of a knife.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteelType {
    /// Stainless steel.
    StainlessSteel,
    /// Damascus steel.
    Damascus,
    /// Carbon steel.
    CarbonSteel,
    /// Titanium.
    Titanium,
    /// Ceramic.
    Ceramic,
}

macro_rules! storage_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Name used in storage.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Parses a storage name.
            pub fn from_storage(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

storage_names!(HandleMaterial {
    Wood => "wood",
    Plastic => "plastic",
    Metal => "metal",
    Rubber => "rubber",
    CarbonFiber => "carbon_fiber",
});

storage_names!(SteelType {
    StainlessSteel => "stainless_steel",
    Damascus => "damascus",
    CarbonSteel => "carbon_steel",
    Titanium => "titanium",
    Ceramic => "ceramic",
});

/// Catalog attributes shared by new and stored products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetails {
    /// Display name.
    pub name: ProductName,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Unit price.
    pub price: Price,
    /// Brand.
    pub brand: Brand,
    /// Blade length.
    pub blade_length: Measure,
    /// Weight.
    pub weight: Measure,
    /// Handle material.
    pub handle_material: HandleMaterial,
    /// Blade steel.
    pub steel_type: SteelType,
}

/// A product to be added to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    /// Catalog attributes.
    pub details: ProductDetails,
    /// Initial stock. Must be positive when the product is created.
    pub stock: StockQuantity,
}

/// A product stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Storage-generated identifier.
    pub id: ProductId,
    /// Catalog attributes.
    pub details: ProductDetails,
    /// Units in stock.
    pub stock: StockQuantity,
}

/// Role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A shopper.
    Customer,
    /// A catalog administrator.
    Admin,
}

impl Role {
    /// Numeric code used in storage.
    pub const fn code(self) -> i16 {
        match self {
            Self::Customer => 0,
            Self::Admin => 1,
        }
    }

    /// Parses a storage code.
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Customer),
            1 => Some(Self::Admin),
            _ => None,
        }
    }
}

/// A user to be registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Unique login name.
    pub username: Username,
    /// Role.
    pub role: Role,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Storage-generated identifier.
    pub id: UserId,
    /// Unique login name.
    pub username: Username,
    /// Role.
    pub role: Role,
    /// Avatar reference, empty when unset.
    pub avatar: String,
}

/// A stored order.
///
/// An unpaid order is its owner's cart. Every stored order holds at least one
/// line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Storage-generated identifier.
    pub id: OrderId,
    /// Owner.
    pub user_id: UserId,
    /// Line items, unique per product.
    pub items: LineItems,
    /// Whether the order has been paid.
    pub paid: bool,
    /// Version for optimistic concurrency control.
    pub version: OrderVersion,
    /// When the order was created.
    pub created_at: Timestamp,
    /// When the order was paid.
    pub paid_at: Option<Timestamp>,
}

impl Order {
    /// The cart key addressing this order.
    pub const fn key(&self) -> CartKey {
        CartKey {
            user_id: self.user_id,
            paid: self.paid,
        }
    }

    /// Returns true if the order holds a line item for `product_id`.
    pub fn references(&self, product_id: ProductId) -> bool {
        self.items.contains(product_id)
    }
}

/// A line item resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The product as currently listed.
    pub product: Product,
    /// Ordered units.
    pub quantity: Quantity,
}

/// Public face of an order's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOwner {
    /// Login name.
    pub username: Username,
    /// Avatar reference, empty when unset.
    pub avatar: String,
}

impl From<User> for OrderOwner {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            avatar: user.avatar,
        }
    }
}

/// An order as shown to shoppers and administrators.
///
/// Line items whose product is no longer in the catalog are left out, so an
/// order kept under [`PaidOrderPolicy::Preserve`](crate::PaidOrderPolicy::Preserve)
/// can hold more items than it shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    /// Order id.
    pub id: OrderId,
    /// Owner.
    pub owner: OrderOwner,
    /// Resolved line items, in ascending product id order.
    pub lines: Vec<OrderLine>,
    /// Whether the order has been paid.
    pub paid: bool,
}

/// A write against the order table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderWrite {
    /// Create the unpaid order (cart) of a user.
    Create {
        /// Owner.
        user_id: UserId,
        /// Initial line items, never empty.
        items: LineItems,
    },
    /// Replace the line items of an unpaid order.
    UpdateItems {
        /// Target order.
        id: OrderId,
        /// Version the caller read.
        expected_version: OrderVersion,
        /// New line items, never empty.
        items: LineItems,
    },
    /// Mark an unpaid order as paid.
    MarkPaid {
        /// Target order.
        id: OrderId,
        /// Version the caller read.
        expected_version: OrderVersion,
        /// Payment time.
        paid_at: Timestamp,
    },
}

impl OrderWrite {
    /// Line items referenced by the write, if it sets any.
    pub const fn items(&self) -> Option<&LineItems> {
        match self {
            Self::Create { items, .. } | Self::UpdateItems { items, .. } => Some(items),
            Self::MarkPaid { .. } => None,
        }
    }
}
