//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat without sending messages to the bot.

/// A parsed chat command.
///
/// These commands control the chat and are not sent to the completion
/// endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Start a new chat with the current bot.
    New,

    /// Switch to another bot, starting a new chat.
    Bot(String),

    /// List the configured bots.
    Bots,

    /// End the chat and request its summary.
    End,

    /// Print the conversation so far.
    History,

    /// Acquire a token, interactively if needed.
    SignIn,

    /// Forget cached credentials.
    SignOut,

    /// Show who is signed in.
    WhoAmI,

    /// Show the decoded claims of the current token.
    Token,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a valid command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use chatapp::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/bot Translator").is_some());
/// assert!(parse_command("I feel anxious").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    if !input.starts_with('/') {
        return None;
    }

    let mut parts = input[1..].splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" | "reset" => ChatCommand::New,
        "bot" => match argument {
            Some(bot) => ChatCommand::Bot(bot.to_string()),
            None => ChatCommand::Invalid("/bot requires a chatbot type".to_string()),
        },
        "bots" => ChatCommand::Bots,
        "end" => ChatCommand::End,
        "history" => ChatCommand::History,
        "signin" | "login" => ChatCommand::SignIn,
        "signout" | "logout" => ChatCommand::SignOut,
        "whoami" => ChatCommand::WhoAmI,
        "token" => ChatCommand::Token,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new chat with the current bot
  /bot <type>            Switch chatbots (starts a new chat)
  /bots                  List the available chatbots
  /end                   End the chat and summarize it
  /history               Show the conversation so far
  /signin                Sign in (or refresh the access token)
  /signout               Forget the cached access token
  /whoami                Show the signed-in user
  /token                 Show the claims of the access token
  /help                  Show this help message
  /quit                  Exit the chat"#
}
