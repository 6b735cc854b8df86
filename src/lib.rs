pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod registry;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
