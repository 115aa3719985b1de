pub mod customer;
pub mod integration;
pub mod order;
pub mod source;
