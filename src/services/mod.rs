pub mod auth_service;
pub mod customer_service;
pub mod inventory;
pub mod order_service;
pub mod product_service;
pub mod report_service;
pub mod sequence;
pub mod tenant_service;
