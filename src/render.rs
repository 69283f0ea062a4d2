//! Output rendering for the chat.
//!
//! This module provides the renderer trait the chat loop draws through and a
//! plain-text implementation with optional ANSI styling.

use std::io::{self, Write};

use crate::chat::ChatState;
use crate::types::{ChatBot, Message, Role};

/// ANSI escape code for dim text (used for informational output).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for bold text (used for speaker labels).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the user's label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the bot's label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Label used for the user's messages.
pub const USER_LABEL: &str = "You";

/// Shown while the first reply of a session is outstanding.
pub const COLD_START_HINT: &str = "Waiting for initial reply. Be patient as the service may take 30 seconds to start up for the initial response.";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print the application banner, preceded by the logo if there is one.
    fn print_banner(&mut self, app_name: &str, logo: Option<&str>, user: Option<&str>);

    /// Print the one-line introduction of a bot.
    fn print_chatbot(&mut self, chatbot: &ChatBot);

    /// Print one message of the conversation.
    ///
    /// Never called for system messages.
    fn print_message(&mut self, chatbot: &ChatBot, message: &Message);

    /// Print the hint that the first reply may take a while.
    fn print_waiting(&mut self);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);
}

/// Renders the user-visible part of the conversation.
///
/// The system message is skipped.  While the first user turn is waiting
/// for its reply the cold-start hint follows the log.
pub fn render_conversation(renderer: &mut dyn Renderer, state: &ChatState) {
    let Some(chatbot) = state.chatbot() else {
        return;
    };
    renderer.print_chatbot(chatbot);
    for message in state.visible_messages() {
        renderer.print_message(chatbot, message);
    }
    if state.messages().len() == 3 && state.is_awaiting_response() {
        renderer.print_waiting();
    }
}

/// The label shown in front of a message.
pub fn speaker<'a>(chatbot: &'a ChatBot, message: &Message) -> &'a str {
    match message.role {
        Role::User => USER_LABEL,
        Role::Assistant | Role::System => &chatbot.name,
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    out: Box<dyn Write + Send>,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer on stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer on stdout with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(Box::new(io::stdout()), use_color)
    }

    /// Creates a renderer that writes to `out`.
    pub fn with_writer(out: Box<dyn Write + Send>, use_color: bool) -> Self {
        Self { out, use_color }
    }

    fn line(&mut self, text: &str) {
        _ = writeln!(self.out, "{text}");
        _ = self.out.flush();
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_banner(&mut self, app_name: &str, logo: Option<&str>, user: Option<&str>) {
        if let Some(logo) = logo {
            self.line(logo);
        }
        let title = self.styled(ANSI_BOLD, app_name);
        match user {
            Some(user) => self.line(&format!("{title} (signed in as {user})")),
            None => self.line(&format!("{title} (please sign in)")),
        }
    }

    fn print_chatbot(&mut self, chatbot: &ChatBot) {
        let name = self.styled(ANSI_BOLD, &chatbot.name);
        self.line(&format!("{name} is {}.", chatbot.description));
    }

    fn print_message(&mut self, chatbot: &ChatBot, message: &Message) {
        let color = match message.role {
            Role::User => ANSI_CYAN,
            Role::Assistant | Role::System => ANSI_GREEN,
        };
        let label = self.styled(color, speaker(chatbot, message));
        self.line(&format!("{label}: {}", message.content));
    }

    fn print_waiting(&mut self) {
        let hint = self.styled(ANSI_DIM, COLD_START_HINT);
        self.line(&hint);
    }

    fn print_error(&mut self, error: &str) {
        let error = self.styled(ANSI_RED, &format!("Error: {error}"));
        self.line(&error);
    }

    fn print_info(&mut self, info: &str) {
        let info = self.styled(ANSI_DIM, info);
        self.line(&info);
    }
}
