// Access control
pub mod security_store;
pub mod tokens;

// Commerce
pub mod catalog;
pub mod checkout;

// External services
pub mod payment_gateway;
