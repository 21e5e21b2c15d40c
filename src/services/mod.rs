// Order workflow
pub mod orders;

// Pure status table and release policy
pub mod order_status;

// Identity directory (delivery agents)
pub mod agents;

// Shops and products, read-only
pub mod catalog;
