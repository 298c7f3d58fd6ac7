pub mod config;
pub mod logging;

pub use config::Environment;
pub use logging::{init_test_logging, setup_logging};
