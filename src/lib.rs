pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;

pub use gateway::{app, GatewayState};
