mod common;

use std::collections::HashSet;

use axum_pos_api::{
    dto::{
        auth::RegisterRequest,
        orders::{CreateOrderRequest, OrderItemRequest},
    },
    entity::users::Role,
    error::AppError,
    services::{auth_service, order_service},
};
use common::{create_product, create_tenant, create_user, setup_state, stock_of};
use tokio::task::JoinSet;

fn single_line(product_id: uuid::Uuid, quantity: i32) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![OrderItemRequest {
            product_id,
            quantity,
        }],
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_get_distinct_numbers() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let tenant = create_tenant(&state, "Rush Hour", true).await?;
    let staff = create_user(&state, &tenant, Role::Staff).await?;
    let product = create_product(&state, &tenant, "1.00", 1_000).await?;

    let product_id = product.id;
    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let (state, tenant, staff) = (state.clone(), tenant.clone(), staff.clone());
        tasks.spawn(async move {
            order_service::create_order(&state, &tenant, &staff, single_line(product_id, 1)).await
        });
    }

    let prefix = format!("ORD-{}-", tenant.tenant_id);
    let mut numbers = HashSet::new();
    let mut created = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(resp) => {
                let order = resp.data.expect("order").order;
                assert!(order.order_number.starts_with(&prefix), "{}", order.order_number);
                let suffix = order.order_number.rsplit('-').next().unwrap_or_default();
                assert_eq!(suffix.len(), 4, "{}", order.order_number);
                assert!(numbers.insert(order.order_number), "duplicate order number");
                created += 1;
            }
            Err(AppError::Contention(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert!(created > 0);
    assert_eq!(stock_of(&state, product.id).await?, 1_000 - created);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_never_oversell() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let tenant = create_tenant(&state, "Last Items", true).await?;
    let staff = create_user(&state, &tenant, Role::Staff).await?;
    let product = create_product(&state, &tenant, "5.00", 5).await?;

    let product_id = product.id;
    let mut tasks = JoinSet::new();
    for _ in 0..12 {
        let (state, tenant, staff) = (state.clone(), tenant.clone(), staff.clone());
        tasks.spawn(async move {
            order_service::create_order(&state, &tenant, &staff, single_line(product_id, 1)).await
        });
    }

    let mut sold = 0;
    let mut rejected = 0;
    let mut contended = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(_) => sold += 1,
            Err(AppError::InsufficientStock { .. }) => rejected += 1,
            Err(AppError::Contention(_)) => contended += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    let remaining = stock_of(&state, product.id).await?;
    assert!(remaining >= 0);
    assert!(sold <= 5);
    assert_eq!(remaining, 5 - sold);
    assert_eq!(sold + rejected + contended, 12);
    if contended == 0 {
        assert_eq!(sold, 5);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_registrations_yield_one_owner() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let tenant = create_tenant(&state, "Grand Opening", true).await?;

    let mut tasks = JoinSet::new();
    for n in 0..6 {
        let (state, tenant) = (state.clone(), tenant.clone());
        tasks.spawn(async move {
            let payload = RegisterRequest {
                name: format!("Founder {n}"),
                email: format!("founder{n}@example.com"),
                password: "correct-horse".into(),
            };
            auth_service::register_user(&state, &tenant, payload).await
        });
    }

    let mut owners = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(resp) => {
                if resp.data.expect("user").role == Role::Owner {
                    owners += 1;
                }
            }
            Err(AppError::Contention(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(owners, 1);

    let (stored_owners,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM users WHERE tenant_id = $1 AND role = 'owner'")
            .bind(tenant.tenant_id)
            .fetch_one(&state.pool)
            .await?;
    assert_eq!(stored_owners, 1);
    Ok(())
}
