// Pipeline ingestion: polite fetching

pub mod rate_limiter;
