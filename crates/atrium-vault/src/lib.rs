pub mod db;
pub mod encryption;
pub mod error;
pub mod probe;
pub mod types;
pub mod vault;

pub use error::VaultError;
pub use types::{Provider, ProviderKey, TestReport, TestStatus};
pub use vault::KeyVault;
