pub mod order;
pub mod order_item;
pub mod product;
pub mod shop;
pub mod user;
