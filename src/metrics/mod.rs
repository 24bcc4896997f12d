pub mod collectors;

pub use collectors::{api_metrics, describe_metrics};
