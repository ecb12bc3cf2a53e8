pub mod config;
pub mod error;
pub mod frames;
pub mod seen;
pub mod types;

pub use config::{Config, StreamSettings};
pub use error::{SearchError, StreamFailure};
pub use frames::StreamFrame;
pub use seen::{SeenKey, SeenSet};
pub use types::*;
