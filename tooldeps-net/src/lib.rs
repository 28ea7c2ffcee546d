// tooldeps-net/src/lib.rs
pub mod http;
pub mod quay;
pub mod validation;

pub use http::{build_http_client, HttpDownloader};
pub use quay::QuayClient;
pub use validation::validate_url;
