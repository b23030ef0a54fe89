pub mod customers;
pub mod order_items;
pub mod order_sequences;
pub mod orders;
pub mod products;
pub mod tenants;
pub mod users;

pub use customers::Entity as Customers;
pub use order_items::Entity as OrderItems;
pub use order_sequences::Entity as OrderSequences;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use tenants::Entity as Tenants;
pub use users::Entity as Users;
