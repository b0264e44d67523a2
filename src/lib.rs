#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod data;
pub mod detail;
pub mod error;
pub mod feed;
pub mod model;
pub mod mutation;
pub mod pipeline;
pub mod refresh;
pub mod session;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, App};
pub use error::{Error, Result};
