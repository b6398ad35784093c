pub mod caption;
pub mod health;
pub mod proxy;
