// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod flight;
pub mod harvest;
pub mod journal;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod read_path;
pub mod scrape;
pub mod store;
pub mod stream;

pub use crate::api::router;
pub use crate::app::Services;
pub use crate::error::{RateError, RateResult};
pub use crate::model::{Quote, Source};
