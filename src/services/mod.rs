// Order lifecycle
pub mod order_status;
pub mod orders;

// Collaborators the lifecycle reads and adjusts
pub mod accounts;
pub mod addresses;
pub mod cart;
pub mod catalog;
pub mod inventory;
