pub mod cli;
pub mod error;
pub mod logging;
pub mod models;
pub mod server;
pub mod services;
pub mod utils;

#[cfg(test)]
mod testing;

pub use cli::{Cli, Commands};
pub use models::Config;
