pub mod client;
pub mod ids;
pub mod mirrors;
pub mod models;
pub mod profiles;
pub mod resolver;
