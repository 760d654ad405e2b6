//! HTTP and queue adapters for the clearing cycle engine

#![forbid(unsafe_code)]

pub mod nats_consumer;
pub mod routes;

pub use routes::{configure, AppState, ErrorBody};
