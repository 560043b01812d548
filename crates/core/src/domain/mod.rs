pub mod intent;
pub mod message;
pub mod order;
pub mod product;
pub mod session;
pub mod support_config;
