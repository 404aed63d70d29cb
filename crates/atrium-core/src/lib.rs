pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use config::AtriumConfig;
pub use context::RequestContext;
pub use error::{AtriumError, Result};
pub use types::{TokenUsage, UserRole};
