//! Per-tenant, per-day order numbers: `ORD-{tenant}-{YYYYMMDD}-{NNNN}`.

use chrono::NaiveDate;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ConnectionTrait, EntityTrait, Set};

use crate::{
    entity::{
        OrderSequences,
        order_sequences::{ActiveModel as SequenceActive, Column as SeqCol},
    },
    error::{AppError, AppResult},
};

/// Largest sequence that still fits the four-digit suffix.
pub const MAX_DAILY_SEQUENCE: i32 = 9999;

pub fn format_order_number(tenant_id: i64, date: NaiveDate, sequence: i32) -> String {
    format!("ORD-{}-{}-{:04}", tenant_id, date.format("%Y%m%d"), sequence)
}

/// Increment the (tenant, date) counter and return the formatted number.
///
/// The upsert takes a row lock on the counter that is held until the caller's
/// transaction ends, so concurrent orders for the same tenant and day queue
/// behind each other instead of reading the same value.
pub async fn next_order_number<C: ConnectionTrait>(
    txn: &C,
    tenant_id: i64,
    date: NaiveDate,
) -> AppResult<String> {
    let seed = SequenceActive {
        tenant_id: Set(tenant_id),
        sequence_date: Set(date),
        last_value: Set(1),
    };

    let counter = OrderSequences::insert(seed)
        .on_conflict(
            OnConflict::columns([SeqCol::TenantId, SeqCol::SequenceDate])
                .value(
                    SeqCol::LastValue,
                    Expr::col((OrderSequences, SeqCol::LastValue)).add(1),
                )
                .to_owned(),
        )
        .exec_with_returning(txn)
        .await?;

    checked_order_number(tenant_id, date, counter.last_value)
}

/// Refuse sequences past the four-digit range; the caller's transaction rolls
/// the counter back along with the order.
fn checked_order_number(tenant_id: i64, date: NaiveDate, sequence: i32) -> AppResult<String> {
    if sequence > MAX_DAILY_SEQUENCE {
        tracing::warn!(tenant_id, %date, "daily order numbers exhausted");
        return Err(AppError::SequenceExhausted { date });
    }
    Ok(format_order_number(tenant_id, date, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_are_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).expect("date");
        assert_eq!(format_order_number(12, date, 1), "ORD-12-20240307-0001");
        assert_eq!(format_order_number(12, date, 42), "ORD-12-20240307-0042");
    }

    #[test]
    fn sequence_stops_at_four_digits() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).expect("date");
        assert_eq!(
            checked_order_number(3, date, MAX_DAILY_SEQUENCE).expect("last number"),
            "ORD-3-20241231-9999"
        );
        let err = checked_order_number(3, date, MAX_DAILY_SEQUENCE + 1).unwrap_err();
        assert!(matches!(err, AppError::SequenceExhausted { .. }));
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }
}
