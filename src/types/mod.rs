// Public modules
pub mod chatbot;
pub mod message;
pub mod token;

// Re-exports
pub use chatbot::{ChatBot, DEFAULT_SUMMARIZE_CONTEXT, DEFAULT_SUMMARIZE_PROMPT};
pub use message::{Message, Role};
pub use token::Token;
