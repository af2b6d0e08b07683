//! Common test data.

use rust_decimal::Decimal;

use crate::model::{
    Brand, HandleMaterial, Measure, NewProduct, NewUser, Price, ProductDetails, ProductName, Role,
    SteelType, Username,
};
use crate::types::{ProductId, Quantity, StockQuantity, UserId};

/// A kitchen knife with ten units in stock.
pub fn knife(name: &str) -> NewProduct {
    knife_with_stock(name, 10)
}

/// A kitchen knife with the given stock.
pub fn knife_with_stock(name: &str, stock: i64) -> NewProduct {
    NewProduct {
        details: ProductDetails {
            name: ProductName::try_new(name).expect("fixture name is valid"),
            description: Some(format!("{name}, hand forged")),
            price: Price::try_new(Decimal::new(12_950, 2)).expect("fixture price is valid"),
            brand: Brand::try_new("Tojiro").expect("fixture brand is valid"),
            blade_length: Measure::try_new(210.0).expect("fixture length is valid"),
            weight: Measure::try_new(180.0).expect("fixture weight is valid"),
            handle_material: HandleMaterial::Wood,
            steel_type: SteelType::Damascus,
        },
        stock: StockQuantity::try_new(stock).expect("fixture stock is valid"),
    }
}

/// A customer.
pub fn shopper(username: &str) -> NewUser {
    NewUser {
        username: Username::try_new(username).expect("fixture username is valid"),
        role: Role::Customer,
    }
}

/// An administrator.
pub fn admin(username: &str) -> NewUser {
    NewUser {
        username: Username::try_new(username).expect("fixture username is valid"),
        role: Role::Admin,
    }
}

/// Shorthand for a valid quantity.
pub fn quantity(units: u32) -> Quantity {
    Quantity::try_new(units).expect("fixture quantity is valid")
}

/// Shorthand for a valid product id.
pub fn product_id(id: i64) -> ProductId {
    ProductId::try_new(id).expect("fixture product id is valid")
}

/// Shorthand for a valid user id.
pub fn user_id(id: i64) -> UserId {
    UserId::try_new(id).expect("fixture user id is valid")
}
