//! Chat sessions with configurable bots.
//!
//! This module provides the conversation core of chatapp:
//!
//! - A session-scoped state machine that owns the message log
//! - A driver that runs token acquisition and completion calls for it
//! - Slash commands and configuration for the terminal front-end
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and application configuration
//! - [`state`]: The chat state machine and its tickets
//! - [`driver`]: Spawns calls for tickets and applies their replies
//! - [`commands`]: Slash command parsing and handling

mod commands;
mod config;
mod driver;
mod state;

pub use crate::render::{PlainTextRenderer, Renderer, render_conversation};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{API_URL_ENV, AppConfig, ChatArgs, IdentityConfig};
pub use driver::{Chat, ChatEvent, resolve};
pub use state::{
    Applied, ChatState, FailureKind, Reply, SessionId, SessionState, Ticket, TicketKind,
    summary_request, transcript,
};
