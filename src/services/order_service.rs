use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    db::begin_locking,
    dto::orders::{CreateOrderRequest, OrderList, OrderWithItems, UpdateOrderStatusRequest},
    entity::{
        Customers, OrderItems, Orders,
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Model as OrderModel, OrderStatus},
    },
    error::{AppError, AppResult},
    middleware::{auth::AuthUser, tenant::TenantContext},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    scope::{authorize, insert_scoped, scoped, scoped_by_id, unscoped},
    services::{
        inventory::{self, StockLine},
        sequence,
    },
    state::AppState,
};

/// Storage constraint guarding `(tenant_id, order_number)`.
pub const ORDER_NUMBER_CONSTRAINT: &str = "orders_tenant_id_order_number_key";

const MAX_NOTES_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn has_cents_precision(value: Decimal) -> bool {
    value.normalize().scale() <= 2
}

/// subtotal = Σ quantity × unit_price; tax = subtotal × rate / 100;
/// total = subtotal + tax − discount.
pub fn compute_totals(
    lines: &[(i32, Decimal)],
    tax_rate: Option<Decimal>,
    discount: Option<Decimal>,
) -> AppResult<Totals> {
    let subtotal: Decimal = lines
        .iter()
        .map(|(quantity, unit_price)| Decimal::from(*quantity) * *unit_price)
        .sum();
    let tax_amount = tax_rate
        .map(|rate| round_money(subtotal * rate / Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO);
    let discount_amount = discount.unwrap_or(Decimal::ZERO);
    let total_amount = subtotal + tax_amount - discount_amount;

    if total_amount < Decimal::ZERO {
        return Err(AppError::BadRequest(
            "discount_amount exceeds order total".into(),
        ));
    }

    Ok(Totals {
        subtotal,
        tax_amount,
        discount_amount,
        total_amount,
    })
}

/// Shape checks that run before any transaction is opened.
pub fn validate_create(payload: &CreateOrderRequest) -> AppResult<Vec<StockLine>> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest("items must not be empty".into()));
    }
    if let Some(rate) = payload.tax_rate {
        if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
            return Err(AppError::BadRequest(
                "tax_rate must be between 0 and 100".into(),
            ));
        }
    }
    if let Some(discount) = payload.discount_amount {
        if discount < Decimal::ZERO || !has_cents_precision(discount) {
            return Err(AppError::BadRequest(
                "discount_amount must be a non-negative amount with at most 2 decimals".into(),
            ));
        }
    }
    if payload
        .notes
        .as_ref()
        .is_some_and(|n| n.chars().count() > MAX_NOTES_LEN)
    {
        return Err(AppError::BadRequest(format!(
            "notes must be at most {MAX_NOTES_LEN} characters"
        )));
    }

    let lines: Vec<StockLine> = payload
        .items
        .iter()
        .map(|item| StockLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    if lines.iter().any(|l| l.quantity <= 0) {
        return Err(AppError::BadRequest("quantity must be positive".into()));
    }
    Ok(lines)
}

fn ensure_transition(order: &OrderModel, next: OrderStatus) -> AppResult<()> {
    if !order.status.can_transition_to(next) {
        return Err(AppError::InvalidTransition {
            order_id: order.id,
            from: order.status,
            to: next,
        });
    }
    Ok(())
}

pub async fn list_orders(
    state: &AppState,
    tenant: &TenantContext,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();

    let mut finder = scoped::<Orders>(tenant);
    if let Some(status) = query.status {
        finder = finder.filter(OrderCol::Status.eq(status));
    }

    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = scoped_by_id::<Orders>(tenant, id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    authorize(user, &order)?;

    let items = load_items(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        with_items(order, items),
        Some(Meta::empty()),
    ))
}

/// Create an order, deduct its stock and assign its number in one transaction.
///
/// A collision on the order number (possible only if the counter row was
/// tampered with) retries the whole transaction a bounded number of times.
pub async fn create_order(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let lines = validate_create(&payload)?;
    let max_attempts = state.config.order_number_retries.max(1);

    let mut attempt = 0;
    let (order, items) = loop {
        attempt += 1;
        match try_create_order(state, tenant, user, &payload, &lines).await {
            Err(err) if err.is_duplicate_of(ORDER_NUMBER_CONSTRAINT) => {
                tracing::warn!(
                    tenant_id = tenant.tenant_id,
                    attempt,
                    "order number collision"
                );
                if attempt >= max_attempts {
                    return Err(AppError::Contention(
                        "order number allocation retries exhausted".into(),
                    ));
                }
            }
            result => break result?,
        }
    };

    tracing::info!(
        tenant_id = tenant.tenant_id,
        order_id = %order.id,
        order_number = %order.order_number,
        total = %order.total_amount,
        "order created"
    );
    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order.id, "order_number": order.order_number }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order created",
        with_items(order, items),
        Some(Meta::empty()),
    ))
}

async fn try_create_order(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    payload: &CreateOrderRequest,
    lines: &[StockLine],
) -> AppResult<(OrderModel, Vec<OrderItemModel>)> {
    let txn = begin_locking(&state.orm, state.config.lock_timeout).await?;

    if let Some(customer_id) = payload.customer_id {
        scoped_by_id::<Customers>(tenant, customer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::BadRequest(format!("Customer {customer_id} not found")))?;
    }

    let products = inventory::reserve_and_deduct(&txn, tenant, lines).await?;

    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        let product = products
            .get(&line.product_id)
            .ok_or_else(|| AppError::BadRequest(format!("Product {} not found", line.product_id)))?;
        priced.push((line.quantity, product.price));
    }
    let totals = compute_totals(&priced, payload.tax_rate, payload.discount_amount)?;

    let order_number =
        sequence::next_order_number(&txn, tenant.tenant_id, Utc::now().date_naive()).await?;

    let order = insert_scoped(
        tenant,
        &txn,
        OrderActive {
            id: Set(Uuid::new_v4()),
            tenant_id: NotSet,
            customer_id: Set(payload.customer_id),
            user_id: Set(Some(user.user_id)),
            order_number: Set(order_number),
            status: Set(OrderStatus::Pending),
            subtotal: Set(totals.subtotal),
            tax_amount: Set(totals.tax_amount),
            discount_amount: Set(totals.discount_amount),
            total_amount: Set(totals.total_amount),
            notes: Set(payload.notes.clone()),
            paid_at: Set(None),
            cancelled_at: Set(None),
            created_at: NotSet,
            updated_at: NotSet,
        },
    )
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for (position, (line, (quantity, unit_price))) in lines.iter().zip(priced).enumerate() {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            position: Set(position as i32),
            quantity: Set(quantity),
            unit_price: Set(unit_price),
            subtotal: Set(Decimal::from(quantity) * unit_price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(item);
    }

    txn.commit().await?;
    Ok((order, items))
}

/// Move an order along the state machine. Cancellation restores stock.
pub async fn update_status(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.status == OrderStatus::Cancelled {
        return cancel_order(state, tenant, user, id).await;
    }

    let txn = begin_locking(&state.orm, state.config.lock_timeout).await?;
    let order = lock_order(&txn, user, id).await?;
    ensure_transition(&order, payload.status)?;

    let now = Utc::now();
    let mut active: OrderActive = order.into();
    active.status = Set(payload.status);
    if payload.status == OrderStatus::Paid {
        active.paid_at = Set(Some(now.into()));
    }
    active.updated_at = Set(now.into());
    let order = active.update(&txn).await?;

    let items = load_items(&txn, order.id).await?;
    txn.commit().await?;

    tracing::info!(
        tenant_id = tenant.tenant_id,
        order_id = %order.id,
        status = %order.status,
        "order status updated"
    );
    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "status": order.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        with_items(order, items),
        Some(Meta::empty()),
    ))
}

/// Cancel a pending or paid order and put its stock back.
pub async fn cancel_order(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = begin_locking(&state.orm, state.config.lock_timeout).await?;
    let order = lock_order(&txn, user, id).await?;
    ensure_transition(&order, OrderStatus::Cancelled)?;

    let items = load_items(&txn, order.id).await?;
    let lines: Vec<StockLine> = items
        .iter()
        .map(|item| StockLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    inventory::restore(&txn, tenant, &lines).await?;

    let now = Utc::now();
    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled);
    active.cancelled_at = Set(Some(now.into()));
    active.updated_at = Set(now.into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(
        tenant_id = tenant.tenant_id,
        order_id = %order.id,
        order_number = %order.order_number,
        "order cancelled"
    );
    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "order_cancel",
        "orders",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order cancelled",
        with_items(order, items),
        Some(Meta::empty()),
    ))
}

/// Lock an order row for a state change. The lookup ignores the ambient
/// tenant; the ownership check that follows rejects foreign orders with
/// `AccessDenied`.
async fn lock_order<C: ConnectionTrait>(txn: &C, user: &AuthUser, id: Uuid) -> AppResult<OrderModel> {
    let order = unscoped::find_by_id::<Orders>(id)
        .lock(LockType::Update)
        .one(txn)
        .await?
        .ok_or(AppError::NotFound)?;
    authorize(user, &order)?;
    Ok(order)
}

async fn load_items<C: ConnectionTrait>(db: &C, order_id: Uuid) -> AppResult<Vec<OrderItemModel>> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::Position)
        .all(db)
        .await?)
}

fn with_items(order: OrderModel, items: Vec<OrderItemModel>) -> OrderWithItems {
    OrderWithItems {
        order: order.into(),
        items: items.into_iter().map(Into::into).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::orders::OrderItemRequest;

    fn dec(value: &str) -> Decimal {
        value.parse().expect("decimal")
    }

    fn request(items: Vec<(Uuid, i32)>) -> CreateOrderRequest {
        CreateOrderRequest {
            items: items
                .into_iter()
                .map(|(product_id, quantity)| OrderItemRequest {
                    product_id,
                    quantity,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn totals_without_tax_or_discount() {
        let totals = compute_totals(&[(3, dec("10.00"))], None, None).expect("totals");
        assert_eq!(totals.subtotal, dec("30.00"));
        assert_eq!(totals.tax_amount, Decimal::ZERO);
        assert_eq!(totals.total_amount, dec("30.00"));
    }

    #[test]
    fn totals_apply_tax_then_discount() {
        let totals = compute_totals(
            &[(3, dec("10.00")), (2, dec("4.99"))],
            Some(dec("10")),
            Some(dec("5.00")),
        )
        .expect("totals");
        assert_eq!(totals.subtotal, dec("39.98"));
        assert_eq!(totals.tax_amount, dec("4.00"));
        assert_eq!(totals.discount_amount, dec("5.00"));
        assert_eq!(totals.total_amount, dec("38.98"));
    }

    #[test]
    fn tax_rounds_half_away_from_zero() {
        // 0.25 * 10% = 0.025
        let totals = compute_totals(&[(1, dec("0.25"))], Some(dec("10")), None).expect("totals");
        assert_eq!(totals.tax_amount, dec("0.03"));
    }

    #[test]
    fn discount_larger_than_total_is_rejected() {
        let err = compute_totals(&[(1, dec("1.00"))], None, Some(dec("2.00"))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn empty_item_list_is_rejected() {
        let err = validate_create(&request(vec![])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let err = validate_create(&request(vec![(Uuid::new_v4(), 0)])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn tax_rate_and_discount_bounds_are_checked() {
        let mut req = request(vec![(Uuid::new_v4(), 1)]);
        req.tax_rate = Some(dec("100.5"));
        assert!(validate_create(&req).is_err());

        req.tax_rate = Some(dec("100"));
        req.discount_amount = Some(dec("-1"));
        assert!(validate_create(&req).is_err());

        req.discount_amount = Some(dec("1.005"));
        assert!(validate_create(&req).is_err());

        req.discount_amount = Some(dec("1.50"));
        assert_eq!(validate_create(&req).expect("valid").len(), 1);
    }

    #[test]
    fn cancelling_a_cancelled_order_is_an_invalid_transition() {
        let now = Utc::now().into();
        let order = OrderModel {
            id: Uuid::new_v4(),
            tenant_id: 1,
            customer_id: None,
            user_id: None,
            order_number: "ORD-1-20240101-0001".into(),
            status: OrderStatus::Cancelled,
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            notes: None,
            paid_at: None,
            cancelled_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        match ensure_transition(&order, OrderStatus::Cancelled) {
            Err(AppError::InvalidTransition { order_id, from, to }) => {
                assert_eq!(order_id, order.id);
                assert_eq!(from, OrderStatus::Cancelled);
                assert_eq!(to, OrderStatus::Cancelled);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
