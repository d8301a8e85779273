pub mod atomic_write;
pub mod logging;
pub mod paths;
pub mod sanitize;

pub use paths::{PathValidationError, validate_binary_path, validate_file_path};
pub use sanitize::sanitize_args;
