// Library exports for the relay binary and integration tests
pub mod address;
pub mod clients;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod monitor;
#[cfg(feature = "api")]
pub mod observability;
pub mod observer;
pub mod relay;
pub mod router;
pub mod state;
pub mod store;
pub mod types;
pub mod webhooks;
