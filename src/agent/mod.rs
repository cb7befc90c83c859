//! Conversation state and the dialogue backend

mod history;
mod openai;

pub use history::{ConversationHistory, ConversationTurn, Role};
pub use openai::{ChatOptions, DEFAULT_SYSTEM_PROMPT, DialogueBackend, OpenAiChat};
