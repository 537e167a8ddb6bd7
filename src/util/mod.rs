//! Utility modules for asgipack

pub mod logging;

pub use logging::{init_from_args, init_from_env, init_logging, LoggingConfig};
