//! HTTP API handlers for cfp-dashboard

pub mod health;
pub mod stream;

pub use health::health_routes;
pub use stream::stream_routes;
