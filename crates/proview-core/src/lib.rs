pub mod config;
pub mod error;
pub mod shared;
pub mod types;

pub use config::ProviewConfig;
pub use error::{ProviewError, Result};
pub use shared::SharedHandle;
pub use types::*;
