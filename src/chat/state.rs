//! The session-scoped chat state machine.
//!
//! [`ChatState`] owns the message log of the current session and decides
//! which asynchronous results may touch it.  It never performs I/O: the
//! methods that need a network call return a [`Ticket`], the caller resolves
//! it into a [`Reply`], and [`ChatState::apply_reply`] reconciles the reply
//! with whatever session is live by then.

use std::sync::Arc;

use crate::observability::{
    SESSION_REFUSED_SUBMISSIONS, SESSION_STALE_DISCARDS, SESSION_SUBMISSIONS, SESSION_SUMMARIES,
    SESSIONS_ENDED, SESSIONS_STARTED,
};
use crate::types::{ChatBot, Message, Role};

/// Identifier of a chat session.  Strictly increasing, starting at 0.
pub type SessionId = u64;

/// The observable state of the chat.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been started yet.
    Idle,
    /// The session is active and a reply is outstanding.
    AwaitingReply,
    /// The session is active and accepting input.
    Active,
    /// The session has ended; it was never summarized.
    Ended,
    /// The session has ended and its summary is outstanding.
    Summarizing,
    /// The session has ended and its summary request resolved.
    Summarized,
}

/// What a ticket asks the completion service for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TicketKind {
    /// The next assistant turn of the conversation.
    Reply,
    /// The end-of-session summary.
    Summary,
}

/// A request issued by the state machine, tagged with its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    /// The session that was live when the ticket was issued.
    pub session_id: SessionId,
    /// What kind of result the ticket expects.
    pub kind: TicketKind,
    /// The messages to send, snapshotted at issue time.
    pub messages: Vec<Message>,
}

/// Why a reply carries an error message instead of a completion.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// No token could be acquired or the token was rejected.
    Auth,
    /// The completion call failed.
    Network,
}

/// The resolution of a [`Ticket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Copied from the ticket.
    pub session_id: SessionId,
    /// Copied from the ticket.
    pub kind: TicketKind,
    /// Assistant text, or a user-visible description of the failure.
    pub content: String,
    /// Set when `content` describes a failure.
    pub failure: Option<FailureKind>,
}

impl Reply {
    /// A successful reply to `ticket`.
    pub fn completed(ticket: &Ticket, content: impl Into<String>) -> Self {
        Self {
            session_id: ticket.session_id,
            kind: ticket.kind,
            content: content.into(),
            failure: None,
        }
    }

    /// A failed reply to `ticket`, rendered as an assistant message.
    pub fn failed(ticket: &Ticket, failure: FailureKind, detail: impl std::fmt::Display) -> Self {
        Self {
            session_id: ticket.session_id,
            kind: ticket.kind,
            content: format!("Sorry, but I'm having some issues right now ({detail})"),
            failure: Some(failure),
        }
    }
}

/// The outcome of applying a [`Reply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The reply was appended to the live session.
    Appended(Message),
    /// The reply belonged to an older session and was dropped.
    Stale,
}

/// The chat state machine.
#[derive(Debug, Clone)]
pub struct ChatState {
    chatbot: Option<Arc<ChatBot>>,
    next_session_id: SessionId,
    session_id: Option<SessionId>,
    messages: Vec<Message>,
    active: bool,
    awaiting_response: bool,
    summarized: bool,
    summary_pending: bool,
}

impl ChatState {
    /// Creates a state machine with no session.
    pub fn new() -> Self {
        Self {
            chatbot: None,
            next_session_id: 0,
            session_id: None,
            messages: Vec::new(),
            active: false,
            awaiting_response: false,
            summarized: false,
            summary_pending: false,
        }
    }

    /// Starts a new session with `chatbot`, orphaning any in-flight tickets.
    ///
    /// Returns the id of the new session.
    pub fn start_session(&mut self, chatbot: Arc<ChatBot>) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.session_id = Some(id);
        self.messages = vec![chatbot.system_message(), chatbot.greeting_message()];
        self.chatbot = Some(chatbot);
        self.active = true;
        self.awaiting_response = false;
        self.summarized = false;
        self.summary_pending = false;
        SESSIONS_STARTED.click();
        id
    }

    /// Appends the user's text and issues a ticket for the assistant's reply.
    ///
    /// Returns `None` without touching the state when no session is active.
    pub fn submit_user_message(&mut self, text: impl Into<String>) -> Option<Ticket> {
        let session_id = match self.session_id {
            Some(id) if self.active => id,
            _ => {
                SESSION_REFUSED_SUBMISSIONS.click();
                return None;
            }
        };
        self.messages.push(Message::user(text));
        self.awaiting_response = true;
        SESSION_SUBMISSIONS.click();
        Some(Ticket {
            session_id,
            kind: TicketKind::Reply,
            messages: self.messages.clone(),
        })
    }

    /// Applies the resolution of a ticket.
    ///
    /// Replies to a conversation turn always clear `awaiting_response`; the
    /// message itself is only appended if the reply's session is still live.
    pub fn apply_reply(&mut self, reply: Reply) -> Applied {
        match reply.kind {
            TicketKind::Reply => self.awaiting_response = false,
            TicketKind::Summary => {
                if self.session_id == Some(reply.session_id) {
                    self.summary_pending = false;
                }
            }
        }
        if self.session_id != Some(reply.session_id) {
            SESSION_STALE_DISCARDS.click();
            return Applied::Stale;
        }
        let message = Message::assistant(reply.content);
        self.messages.push(message.clone());
        Applied::Appended(message)
    }

    /// Ends the session.
    ///
    /// The first call on a session marks it summarized and returns the
    /// summary ticket; later calls return `None`.
    pub fn end_session(&mut self) -> Option<Ticket> {
        let session_id = self.session_id?;
        if self.active {
            SESSIONS_ENDED.click();
        }
        self.active = false;
        if self.summarized {
            return None;
        }
        let chatbot = self.chatbot.clone()?;
        self.summarized = true;
        self.summary_pending = true;
        SESSION_SUMMARIES.click();
        Some(Ticket {
            session_id,
            kind: TicketKind::Summary,
            messages: summary_request(&chatbot, &self.messages),
        })
    }

    /// The observable state.
    pub fn state(&self) -> SessionState {
        if self.session_id.is_none() {
            SessionState::Idle
        } else if self.active {
            if self.awaiting_response {
                SessionState::AwaitingReply
            } else {
                SessionState::Active
            }
        } else if !self.summarized {
            SessionState::Ended
        } else if self.summary_pending {
            SessionState::Summarizing
        } else {
            SessionState::Summarized
        }
    }

    /// The id of the live session, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// The bot of the live session, if any.
    pub fn chatbot(&self) -> Option<&ChatBot> {
        self.chatbot.as_deref()
    }

    /// The bot of the live session, shared with whoever renders it.
    pub fn shared_chatbot(&self) -> Option<Arc<ChatBot>> {
        self.chatbot.clone()
    }

    /// The full message log, system message included.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The messages a user gets to see: everything after the system message.
    pub fn visible_messages(&self) -> &[Message] {
        self.messages.get(1..).unwrap_or(&[])
    }

    /// Whether the session accepts input.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a conversation reply is outstanding.
    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    /// Whether the summary of this session has been requested.
    pub fn is_summarized(&self) -> bool {
        self.summarized
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

/// A plain-text transcript: one `"role: content"` line per non-system message.
pub fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|message| message.role != Role::System)
        .map(|message| format!("{}: {}\n", message.role, message.content))
        .collect()
}

/// The messages sent to summarize a conversation with `chatbot`.
pub fn summary_request(chatbot: &ChatBot, messages: &[Message]) -> Vec<Message> {
    vec![
        Message::system(chatbot.summarize_context()),
        Message::user(format!(
            "{}\n{}",
            chatbot.summarize_prompt(),
            transcript(messages)
        )),
    ]
}
