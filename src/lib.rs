// Public modules
pub mod auth;
pub mod chat;
pub mod client;
pub mod error;
pub mod render;
pub mod types;

mod observability;

// Re-exports
pub use auth::{
    CachedTokenProvider, CommandPrompt, NoPrompt, StaticTokenProvider, TokenPrompt, TokenProvider,
};
pub use client::{CompletionClient, CompletionService};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use types::*;
