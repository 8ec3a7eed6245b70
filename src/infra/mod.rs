// Adapters for the application ports

pub mod http_client;

pub use http_client::ReqwestFetcher;
