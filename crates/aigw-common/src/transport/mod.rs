//! HTTP transport layer shared by the dispatcher, the health monitor and the
//! CLI.

pub mod http;

pub use http::HttpClient;
