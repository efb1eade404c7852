//! HTTP API handlers for cfp-broker

pub mod health;
pub mod topics;

pub use health::health_routes;
pub use topics::{list_topics, publish, subscribe};
