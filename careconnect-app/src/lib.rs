pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod log;
pub mod models;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;
