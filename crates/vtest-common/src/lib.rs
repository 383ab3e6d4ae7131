pub mod logging;
pub mod platform;

pub use logging::init_logging;
