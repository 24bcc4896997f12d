pub mod checks;

pub use checks::{health_check, ComponentHealth, HealthState, HealthStatus};
