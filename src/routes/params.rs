use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{entity::orders::OrderStatus, error::AppError};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1).saturating_mul(per_page);
        (page, per_page, offset)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductSortBy {
    CreatedAt,
    Price,
    Name,
}

// Query structs carry page/per_page directly: serde's `flatten` cannot parse
// numbers out of a query string.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProductQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub q: Option<String>,
    pub sort_by: Option<ProductSortBy>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CustomerQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct OrderListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<OrderStatus>,
    pub sort_order: Option<SortOrder>,
}

macro_rules! paginated {
    ($($query:ty),+) => {
        $(impl $query {
            pub fn pagination(&self) -> Pagination {
                Pagination {
                    page: self.page,
                    per_page: self.per_page,
                }
            }
        })+
    };
}

paginated!(ProductQuery, CustomerQuery, OrderListQuery);

/// `ILIKE` pattern matching `search` anywhere, with `%`, `_` and `\` taken literally.
pub fn contains_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Inclusive range of calendar days (UTC).
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct DateRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRangeQuery {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.from > self.to {
            return Err(AppError::BadRequest("from must not be after to".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct TopProductsQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub limit: Option<i64>,
}

impl TopProductsQuery {
    pub fn range(&self) -> DateRangeQuery {
        DateRangeQuery {
            from: self.from,
            to: self.to,
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(10).clamp(1, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination {
            page: Some(0),
            per_page: Some(1000),
        };
        assert_eq!(p.normalize(), (1, 100, 0));

        let p = Pagination {
            page: Some(3),
            per_page: Some(10),
        };
        assert_eq!(p.normalize(), (3, 10, 20));
    }

    #[test]
    fn huge_page_saturates_offset() {
        let p = Pagination {
            page: Some(i64::MAX),
            per_page: Some(100),
        };
        assert_eq!(p.normalize(), (i64::MAX, 100, i64::MAX));

        let p = Pagination {
            page: Some(i64::MIN),
            per_page: None,
        };
        assert_eq!(p.normalize(), (1, 20, 0));
    }

    #[test]
    fn search_wildcards_are_escaped() {
        assert_eq!(contains_pattern("latte"), "%latte%");
        assert_eq!(contains_pattern("50%_off"), r"%50\%\_off%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn reversed_date_range_is_rejected() {
        let range = DateRangeQuery {
            from: NaiveDate::from_ymd_opt(2024, 5, 2).expect("date"),
            to: NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"),
        };
        assert!(matches!(range.validate(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn top_products_limit_defaults_and_clamps() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).expect("date");
        let mut query = TopProductsQuery {
            from: day,
            to: day,
            limit: None,
        };
        assert_eq!(query.limit(), 10);
        query.limit = Some(500);
        assert_eq!(query.limit(), 100);
    }
}
