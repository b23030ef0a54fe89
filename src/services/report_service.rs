//! Read-only aggregates over committed data.
//!
//! Reports take the tenant id explicitly rather than a request context so they
//! can run outside a request.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, QueryFilter, QueryOrder};

use crate::{
    dto::reports::{DailySales, LowStockReport, SalesReport, TopProduct, TopProductsReport},
    entity::{Products, orders::OrderStatus, products::Column as ProdCol},
    error::{AppError, AppResult},
    response::{ApiResponse, Meta},
    routes::params::{DateRangeQuery, TopProductsQuery},
    scope::unscoped,
    state::AppState,
};

/// `[from 00:00, to + 1 day 00:00)` in UTC.
fn day_bounds(range: &DateRangeQuery) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    range.validate()?;
    let start = range.from.and_time(NaiveTime::MIN).and_utc();
    let end = range
        .to
        .checked_add_days(Days::new(1))
        .ok_or_else(|| AppError::BadRequest("to is out of range".into()))?
        .and_time(NaiveTime::MIN)
        .and_utc();
    Ok((start, end))
}

/// Paid revenue bucketed by the UTC day each order was paid.
pub async fn sales_report(
    state: &AppState,
    tenant_id: i64,
    range: DateRangeQuery,
) -> AppResult<ApiResponse<SalesReport>> {
    let (start, end) = day_bounds(&range)?;

    let days = sqlx::query_as::<_, DailySales>(
        r#"
        SELECT (paid_at AT TIME ZONE 'UTC')::date AS day,
               COUNT(*) AS order_count,
               COALESCE(SUM(total_amount), 0) AS revenue
        FROM orders
        WHERE tenant_id = $1
          AND status = $2
          AND paid_at >= $3
          AND paid_at < $4
        GROUP BY day
        ORDER BY day
        "#,
    )
    .bind(tenant_id)
    .bind(OrderStatus::Paid.as_str())
    .bind(start)
    .bind(end)
    .fetch_all(&state.pool)
    .await?;

    let report = summarize(range.from, range.to, days);
    Ok(ApiResponse::success("Sales report", report, Some(Meta::empty())))
}

fn summarize(from: NaiveDate, to: NaiveDate, days: Vec<DailySales>) -> SalesReport {
    let order_count = days.iter().map(|d| d.order_count).sum();
    let revenue = days.iter().map(|d| d.revenue).sum::<Decimal>();
    SalesReport {
        from,
        to,
        order_count,
        revenue,
        days,
    }
}

pub async fn top_products(
    state: &AppState,
    tenant_id: i64,
    query: TopProductsQuery,
) -> AppResult<ApiResponse<TopProductsReport>> {
    let range = query.range();
    let (start, end) = day_bounds(&range)?;

    let items = sqlx::query_as::<_, TopProduct>(
        r#"
        SELECT p.id AS product_id,
               p.name,
               p.sku,
               SUM(oi.quantity)::BIGINT AS quantity_sold,
               SUM(oi.subtotal) AS revenue
        FROM order_items oi
        JOIN orders o ON o.id = oi.order_id
        JOIN products p ON p.id = oi.product_id
        WHERE o.tenant_id = $1
          AND p.tenant_id = $1
          AND o.status = $2
          AND o.paid_at >= $3
          AND o.paid_at < $4
        GROUP BY p.id, p.name, p.sku
        ORDER BY quantity_sold DESC, p.name
        LIMIT $5
        "#,
    )
    .bind(tenant_id)
    .bind(OrderStatus::Paid.as_str())
    .bind(start)
    .bind(end)
    .bind(query.limit())
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::success(
        "Top products",
        TopProductsReport {
            from: range.from,
            to: range.to,
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn low_stock(state: &AppState, tenant_id: i64) -> AppResult<ApiResponse<LowStockReport>> {
    let items = unscoped::for_tenant::<Products>(tenant_id)
        .filter(ProdCol::DeletedAt.is_null())
        .filter(Expr::col(ProdCol::StockQuantity).lte(Expr::col(ProdCol::LowStockThreshold)))
        .order_by_asc(ProdCol::StockQuantity)
        .order_by_asc(ProdCol::Name)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(ApiResponse::success(
        "Low stock",
        LowStockReport { items },
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn day_bounds_cover_whole_days() {
        let (start, end) = day_bounds(&DateRangeQuery {
            from: date(2024, 2, 28),
            to: date(2024, 2, 29),
        })
        .expect("bounds");
        assert_eq!(start.to_rfc3339(), "2024-02-28T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn summary_totals_days() {
        let days = vec![
            DailySales {
                day: date(2024, 1, 1),
                order_count: 2,
                revenue: Decimal::new(3000, 2),
            },
            DailySales {
                day: date(2024, 1, 2),
                order_count: 1,
                revenue: Decimal::new(1050, 2),
            },
        ];
        let report = summarize(date(2024, 1, 1), date(2024, 1, 2), days);
        assert_eq!(report.order_count, 3);
        assert_eq!(report.revenue, Decimal::new(4050, 2));
    }
}
