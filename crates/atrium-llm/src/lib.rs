pub mod client;
pub mod error;
pub mod pricing;
pub mod stream;

pub use client::{ChatMessage, CompletionStreamer, LlmClient, ModelInfo, Role};
pub use error::LlmError;
pub use pricing::{compute_cost, ModelPricing, PricingCache};
pub use stream::StreamEvent;
