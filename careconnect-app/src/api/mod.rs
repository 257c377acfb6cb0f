//! HTTP client wrapper around the CareConnect REST API

mod client;
mod error;

pub use client::{ApiClient, ApiEvent, Listener};
pub use error::{normalize, ApiError, RawFailure};
