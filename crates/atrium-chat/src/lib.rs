pub mod assistants;
pub mod conversations;
pub mod db;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod types;
pub mod workspaces;

pub use assistants::AssistantStore;
pub use conversations::ConversationStore;
pub use error::ChatError;
pub use events::ChatEvent;
pub use orchestrator::ChatOrchestrator;
pub use types::{Assistant, Conversation, Message, MessageRole, Workspace};
pub use workspaces::WorkspaceStore;
