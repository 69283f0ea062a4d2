use serde::{Deserialize, Serialize};

use crate::types::Message;

/// System context used for the end-of-session summary when a bot sets none.
pub const DEFAULT_SUMMARIZE_CONTEXT: &str =
    "You summarize conversations between a user and an assistant";

/// Prompt placed before the transcript when a bot sets none.
pub const DEFAULT_SUMMARIZE_PROMPT: &str = "Summarize the following conversation:";

/// A chatbot definition.
///
/// Bots are read-only reference data supplied by configuration; sessions
/// borrow them but never modify them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBot {
    /// Short identifier used to select the bot, e.g. "Therapist".
    #[serde(rename = "type")]
    pub bot_type: String,

    /// Display name of the bot.
    pub name: String,

    /// Personality woven into the system message.
    pub personality: String,

    /// One-line description shown above the conversation.
    pub description: String,

    /// Instructions that seed the system message.
    pub context: String,

    /// First assistant message of every session.
    pub greeting: String,

    /// System context for the end-of-session summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize_context: Option<String>,

    /// Prompt placed before the transcript in the summary request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize_prompt: Option<String>,
}

impl ChatBot {
    /// The system message that opens every session with this bot.
    pub fn system_message(&self) -> Message {
        Message::system(format!(
            "{}. Your name is {} and your personality is {}.",
            self.context, self.name, self.personality
        ))
    }

    /// The greeting that follows the system message.
    pub fn greeting_message(&self) -> Message {
        Message::assistant(self.greeting.clone())
    }

    /// The summary system context, falling back to the crate default.
    pub fn summarize_context(&self) -> &str {
        self.summarize_context
            .as_deref()
            .unwrap_or(DEFAULT_SUMMARIZE_CONTEXT)
    }

    /// The summary prompt, falling back to the crate default.
    pub fn summarize_prompt(&self) -> &str {
        self.summarize_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SUMMARIZE_PROMPT)
    }

    /// The bots shipped with the application.
    pub fn defaults() -> Vec<ChatBot> {
        vec![
            ChatBot {
                bot_type: "Therapist".to_string(),
                name: "Dr. Feelgood".to_string(),
                personality: "professional, supportive, empathetic, skilled in active listening, CBT, and DBT".to_string(),
                description: "an AI therapist".to_string(),
                context: "You are a therapist helping someone understand and address their psychological challenges".to_string(),
                greeting: "Hello. What's on your mind?".to_string(),
                summarize_context: Some("You are a therapist writing session notes".to_string()),
                summarize_prompt: Some("Write brief session notes for the following conversation:".to_string()),
            },
            ChatBot {
                bot_type: "Translator".to_string(),
                name: "Alex".to_string(),
                personality: "expert at translating to whatever language the user specified in their initial message".to_string(),
                description: "a translator".to_string(),
                context: "You always start by asking them for a target language. You next confirm their language by saying 'type anything and I'll translate it to <language>' (you must say this in English, regardless of what language they want you to translate to later). After that, you just translate the last thing they said to that language.".to_string(),
                greeting: "What language shall I translate to?".to_string(),
                summarize_context: None,
                summarize_prompt: None,
            },
        ]
    }
}
