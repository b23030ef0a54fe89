//! Stock ledger. Every mutation of `products.stock_quantity` goes through
//! here, inside the caller's transaction, after taking `FOR UPDATE` locks on
//! the affected rows in ascending product id order.

use std::collections::{BTreeMap, HashMap};

use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{ColumnTrait, ConnectionTrait, QueryFilter, QuerySelect};
use uuid::Uuid;

use crate::{
    entity::{
        Products,
        products::{Column as ProdCol, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::tenant::TenantContext,
    scope::{scoped_by_id, scoped_update},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Total quantity per product, keyed in lock order.
pub fn aggregate(lines: &[StockLine]) -> AppResult<BTreeMap<Uuid, i32>> {
    let mut totals = BTreeMap::new();
    for line in lines {
        if line.quantity <= 0 {
            return Err(AppError::BadRequest("quantity must be positive".into()));
        }
        let total: &mut i32 = totals.entry(line.product_id).or_insert(0);
        *total = total
            .checked_add(line.quantity)
            .ok_or_else(|| AppError::BadRequest("quantity is too large".into()))?;
    }
    Ok(totals)
}

/// Lock every referenced product, verify stock against the locked values and
/// deduct. Nothing is written unless every line can be satisfied.
///
/// Returns the locked products (with post-deduction stock) keyed by id.
pub async fn reserve_and_deduct<C: ConnectionTrait>(
    txn: &C,
    tenant: &TenantContext,
    lines: &[StockLine],
) -> AppResult<HashMap<Uuid, ProductModel>> {
    let totals = aggregate(lines)?;

    let mut locked = Vec::with_capacity(totals.len());
    for (&product_id, &requested) in &totals {
        let product = lock_product(txn, tenant, product_id)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| AppError::BadRequest(format!("Product {product_id} not found")))?;
        locked.push((product, requested));
    }

    for (product, requested) in &locked {
        ensure_available(product, *requested)?;
    }

    let mut products = HashMap::with_capacity(locked.len());
    for (mut product, requested) in locked {
        apply_delta(txn, tenant, product.id, -requested).await?;
        product.stock_quantity -= requested;
        products.insert(product.id, product);
    }

    tracing::debug!(
        tenant_id = tenant.tenant_id,
        products = products.len(),
        "stock reserved"
    );
    Ok(products)
}

/// Put stock back for every line. Soft-deleted products are restored too.
pub async fn restore<C: ConnectionTrait>(
    txn: &C,
    tenant: &TenantContext,
    lines: &[StockLine],
) -> AppResult<()> {
    let totals = aggregate(lines)?;

    for &product_id in totals.keys() {
        lock_product(txn, tenant, product_id)
            .await?
            .ok_or(AppError::NotFound)?;
    }

    for (&product_id, &quantity) in &totals {
        apply_delta(txn, tenant, product_id, quantity).await?;
    }

    tracing::debug!(
        tenant_id = tenant.tenant_id,
        products = totals.len(),
        "stock restored"
    );
    Ok(())
}

/// Manual correction of a single product's stock by `delta`.
pub async fn adjust<C: ConnectionTrait>(
    txn: &C,
    tenant: &TenantContext,
    product_id: Uuid,
    delta: i32,
) -> AppResult<ProductModel> {
    if delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let mut product = lock_product(txn, tenant, product_id)
        .await?
        .filter(|p| !p.is_deleted())
        .ok_or(AppError::NotFound)?;

    let new_stock = product
        .stock_quantity
        .checked_add(delta)
        .ok_or_else(|| AppError::BadRequest("delta is too large".into()))?;
    if new_stock < 0 {
        return Err(AppError::InsufficientStock {
            product_id,
            requested: -delta,
            available: product.stock_quantity,
        });
    }

    apply_delta(txn, tenant, product_id, delta).await?;
    product.stock_quantity = new_stock;
    Ok(product)
}

pub fn ensure_available(product: &ProductModel, requested: i32) -> AppResult<()> {
    if product.stock_quantity < requested {
        return Err(AppError::InsufficientStock {
            product_id: product.id,
            requested,
            available: product.stock_quantity,
        });
    }
    Ok(())
}

async fn lock_product<C: ConnectionTrait>(
    txn: &C,
    tenant: &TenantContext,
    product_id: Uuid,
) -> AppResult<Option<ProductModel>> {
    Ok(scoped_by_id::<Products>(tenant, product_id)
        .lock(LockType::Update)
        .one(txn)
        .await?)
}

async fn apply_delta<C: ConnectionTrait>(
    txn: &C,
    tenant: &TenantContext,
    product_id: Uuid,
    delta: i32,
) -> AppResult<()> {
    let result = scoped_update::<Products>(tenant)
        .col_expr(
            ProdCol::StockQuantity,
            Expr::col(ProdCol::StockQuantity).add(delta),
        )
        .col_expr(ProdCol::UpdatedAt, Expr::current_timestamp().into())
        .filter(ProdCol::Id.eq(product_id))
        .exec(txn)
        .await?;

    if result.rows_affected != 1 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn product(stock: i32) -> ProductModel {
        let now = chrono::Utc::now().into();
        ProductModel {
            id: Uuid::new_v4(),
            tenant_id: 1,
            name: "Widget".into(),
            sku: "W-1".into(),
            description: None,
            price: Decimal::new(1000, 2),
            stock_quantity: stock,
            low_stock_threshold: 10,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn aggregate_merges_duplicate_products_in_id_order() {
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        let totals = aggregate(&[
            StockLine {
                product_id: a,
                quantity: 2,
            },
            StockLine {
                product_id: b,
                quantity: 1,
            },
            StockLine {
                product_id: a,
                quantity: 3,
            },
        ])
        .expect("aggregated");

        let ordered: Vec<_> = totals.into_iter().collect();
        assert_eq!(ordered, vec![(b, 1), (a, 5)]);
    }

    #[test]
    fn aggregate_rejects_non_positive_quantities() {
        let line = StockLine {
            product_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert!(matches!(aggregate(&[line]), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn insufficient_stock_reports_requested_and_available() {
        let p = product(5);
        match ensure_available(&p, 999) {
            Err(AppError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => {
                assert_eq!(product_id, p.id);
                assert_eq!(requested, 999);
                assert_eq!(available, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ensure_available(&p, 5).is_ok());
    }
}
