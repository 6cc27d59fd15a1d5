//! PTT host: supervises out-of-process modules, proxies their routes behind
//! session authentication and serves them a scoped key/value store.

pub mod auth;
pub mod db;
pub mod infra;
pub mod plugins;
pub mod proxy;
pub mod routes;
pub mod session;
pub mod store;
pub mod views;

pub use infra::AppState;
pub use routes::create_app;
