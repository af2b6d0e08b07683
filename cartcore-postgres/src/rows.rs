//! Conversions between database rows and cartcore records.

use std::fmt::Display;

use cartcore::model::{
    Brand, HandleMaterial, Measure, Price, ProductDetails, ProductName, SteelType, Username,
};
use cartcore::{
    LineItemCodec, Order, OrderId, OrderVersion, Product, ProductId, Role, StockQuantity,
    StoreError, Timestamp, User, UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, Row};

use crate::map_sqlx_error;

pub(crate) const PRODUCT_COLUMNS: &str = "id, name, description, price, brand, blade_length, \
     weight, handle_material, steel_type, stock";

pub(crate) const ORDER_COLUMNS: &str = "id, user_id, items, paid, version, created_at, paid_at";

pub(crate) const USER_COLUMNS: &str = "id, username, role, avatar";

fn column<'r, T>(row: &'r PgRow, name: &'static str, operation: &'static str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name).map_err(|error| map_sqlx_error(error, operation))
}

fn invalid<E: Display>(column: &'static str) -> impl FnOnce(E) -> StoreError {
    move |error| StoreError::InvalidRecord(format!("{column}: {error}"))
}

pub(crate) fn product_id(raw: i64) -> Result<ProductId, StoreError> {
    ProductId::try_new(raw).map_err(invalid("product id"))
}

pub(crate) fn order_id(raw: i64) -> Result<OrderId, StoreError> {
    OrderId::try_new(raw).map_err(invalid("order id"))
}

pub(crate) fn user_id(raw: i64) -> Result<UserId, StoreError> {
    UserId::try_new(raw).map_err(invalid("user id"))
}

pub(crate) fn version(raw: i64) -> Result<OrderVersion, StoreError> {
    let raw = u64::try_from(raw).map_err(invalid("version"))?;
    OrderVersion::try_new(raw).map_err(invalid("version"))
}

/// The database representation of a version.
pub(crate) fn version_param(version: OrderVersion) -> Result<i64, StoreError> {
    i64::try_from(version.into_inner()).map_err(invalid("version"))
}

pub(crate) fn product(row: &PgRow, operation: &'static str) -> Result<Product, StoreError> {
    let handle: String = column(row, "handle_material", operation)?;
    let steel: String = column(row, "steel_type", operation)?;

    let details = ProductDetails {
        name: ProductName::try_new(column::<String>(row, "name", operation)?)
            .map_err(invalid("name"))?,
        description: column(row, "description", operation)?,
        price: Price::try_new(column::<Decimal>(row, "price", operation)?)
            .map_err(invalid("price"))?,
        brand: Brand::try_new(column::<String>(row, "brand", operation)?)
            .map_err(invalid("brand"))?,
        blade_length: Measure::try_new(column::<f64>(row, "blade_length", operation)?)
            .map_err(invalid("blade_length"))?,
        weight: Measure::try_new(column::<f64>(row, "weight", operation)?)
            .map_err(invalid("weight"))?,
        handle_material: HandleMaterial::from_storage(&handle)
            .ok_or_else(|| StoreError::InvalidRecord(format!("handle_material: {handle:?}")))?,
        steel_type: SteelType::from_storage(&steel)
            .ok_or_else(|| StoreError::InvalidRecord(format!("steel_type: {steel:?}")))?,
    };

    Ok(Product {
        id: product_id(column(row, "id", operation)?)?,
        details,
        stock: StockQuantity::try_new(column::<i64>(row, "stock", operation)?)
            .map_err(invalid("stock"))?,
    })
}

pub(crate) fn user(row: &PgRow, operation: &'static str) -> Result<User, StoreError> {
    let code: i16 = column(row, "role", operation)?;
    Ok(User {
        id: user_id(column(row, "id", operation)?)?,
        username: Username::try_new(column::<String>(row, "username", operation)?)
            .map_err(invalid("username"))?,
        role: Role::from_code(code)
            .ok_or_else(|| StoreError::InvalidRecord(format!("role: {code}")))?,
        avatar: column(row, "avatar", operation)?,
    })
}

/// Decodes an order row, including its line-item blob.
///
/// A blob that fails to decode is reported as [`StoreError::CorruptOrder`].
pub(crate) fn order(row: &PgRow, operation: &'static str) -> Result<Order, StoreError> {
    let id = order_id(column(row, "id", operation)?)?;
    let blob: String = column(row, "items", operation)?;
    let items = LineItemCodec::decode(&blob)
        .map_err(|source| StoreError::CorruptOrder { order_id: id, source })?;
    let created_at: DateTime<Utc> = column(row, "created_at", operation)?;
    let paid_at: Option<DateTime<Utc>> = column(row, "paid_at", operation)?;

    Ok(Order {
        id,
        user_id: user_id(column(row, "user_id", operation)?)?,
        items,
        paid: column(row, "paid", operation)?,
        version: version(column(row, "version", operation)?)?,
        created_at: Timestamp::from(created_at),
        paid_at: paid_at.map(Timestamp::from),
    })
}

pub(crate) fn orders(rows: &[PgRow], operation: &'static str) -> Result<Vec<Order>, StoreError> {
    rows.iter().map(|row| order(row, operation)).collect()
}
