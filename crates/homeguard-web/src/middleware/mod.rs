//! HTTP middleware outside the authentication gate

pub mod metrics;

pub use metrics::{metrics_middleware, Metrics};
