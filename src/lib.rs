pub mod activity;
pub mod config;
pub mod errors;
pub mod hosting;
pub mod lifecycle;
pub mod models;
pub mod naming;
pub mod proxy;
pub mod reconcile;
pub mod runtime;
pub mod server;
pub mod source;
pub mod store;
