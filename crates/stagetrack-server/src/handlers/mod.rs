pub mod auth;
pub mod clients;
pub mod health;
pub mod metrics;
pub mod swagger;
pub mod users;
