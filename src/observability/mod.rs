// Observability: metrics (logging lives in crate::logging)

pub mod metrics;
