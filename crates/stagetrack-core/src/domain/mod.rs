//! Domain entities shared by every layer: clients with their embedded
//! contracts, stage definitions, metric rows and users.

pub mod client;
pub mod metric;
pub mod stage;
pub mod user;
