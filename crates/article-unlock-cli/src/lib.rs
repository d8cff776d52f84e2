//! Command-line front end for article-unlock: built-in methods, the HTTP
//! fetcher they share, and config discovery.

pub mod config;
pub mod http;
pub mod methods;

pub use config::{load_config, resolve_config_path};
pub use http::{HttpFetcher, HttpResponse, RetryPolicy};
pub use methods::{builtin_methods, register_builtin};
