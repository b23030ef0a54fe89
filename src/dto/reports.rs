use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct DailySales {
    pub day: NaiveDate,
    pub order_count: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SalesReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub order_count: i64,
    pub revenue: Decimal,
    pub days: Vec<DailySales>,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct TopProduct {
    pub product_id: Uuid,
    pub name: String,
    pub sku: String,
    pub quantity_sold: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TopProductsReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub items: Vec<TopProduct>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LowStockReport {
    pub items: Vec<Product>,
}
