pub mod config;
pub mod error;

pub use config::VtestConfig;
pub use error::CoreError;
