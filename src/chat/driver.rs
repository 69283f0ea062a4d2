//! Runs tickets issued by the chat state machine.
//!
//! [`Chat`] is the handle the presentation layer talks to.  Every call that
//! needs the network takes a ticket from [`ChatState`] under the lock,
//! releases the lock, and spawns a task that acquires a token, calls the
//! completion service and applies the reply under the lock again, sending its
//! event before releasing it.  Nothing
//! holds the lock across an await point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::auth::TokenProvider;
use crate::chat::config::AppConfig;
use crate::chat::state::{Applied, ChatState, FailureKind, Reply, SessionId, Ticket, TicketKind};
use crate::client::CompletionService;
use crate::error::{Error, Result};
use crate::types::{ChatBot, Message};

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A new session started and shows its greeting.
    SessionStarted {
        /// The new session.
        session_id: SessionId,
        /// The bot of the new session.
        chatbot: Arc<ChatBot>,
    },
    /// A reply was appended to the live session.
    Appended {
        /// The session the reply was applied to.
        session_id: SessionId,
        /// What kind of ticket produced it.
        kind: TicketKind,
        /// The appended message.
        message: Message,
    },
    /// A reply for an older session was dropped.
    Discarded {
        /// The session the reply belonged to.
        session_id: SessionId,
    },
    /// A call failed because the user needs to sign in again.
    AuthFailed {
        /// The session the call belonged to.
        session_id: SessionId,
    },
}

/// The chat driver.
pub struct Chat {
    config: Arc<AppConfig>,
    state: Arc<Mutex<ChatState>>,
    tokens: Arc<dyn TokenProvider>,
    completions: Arc<dyn CompletionService>,
    events: Option<UnboundedSender<ChatEvent>>,
}

impl Chat {
    /// Creates a driver and starts a session with the default chatbot.
    pub fn new(
        config: AppConfig,
        tokens: Arc<dyn TokenProvider>,
        completions: Arc<dyn CompletionService>,
    ) -> Result<Self> {
        config.validate()?;
        let chatbot = config
            .default_chatbot()
            .cloned()
            .ok_or_else(|| Error::config("at least one chatbot must be configured"))?;
        let mut state = ChatState::new();
        state.start_session(Arc::new(chatbot));
        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            tokens,
            completions,
            events: None,
        })
    }

    /// Sends [`ChatEvent`]s to `events`.
    pub fn with_events(mut self, events: UnboundedSender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The configuration the driver was built with.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The token provider calls are authorized with.
    pub fn tokens(&self) -> &Arc<dyn TokenProvider> {
        &self.tokens
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> ChatState {
        self.lock().clone()
    }

    /// Starts a new chat with the current bot.
    pub fn start_session(&self) -> Result<SessionId> {
        let mut state = self.lock();
        let chatbot = state
            .shared_chatbot()
            .ok_or_else(|| Error::config("no chatbot selected"))?;
        Ok(self.restart(&mut state, chatbot))
    }

    /// Switches to the bot of type `bot_type` and starts a new chat with it.
    pub fn select_chatbot(&self, bot_type: &str) -> Result<SessionId> {
        let chatbot = self.config.chatbot(bot_type).cloned().ok_or_else(|| {
            Error::validation("unknown chatbot", Some(bot_type.to_string()))
        })?;
        let mut state = self.lock();
        Ok(self.restart(&mut state, Arc::new(chatbot)))
    }

    fn restart(&self, state: &mut ChatState, chatbot: Arc<ChatBot>) -> SessionId {
        let session_id = state.start_session(Arc::clone(&chatbot));
        tracing::info!("started session {session_id} with {}", chatbot.name);
        self.emit(ChatEvent::SessionStarted {
            session_id,
            chatbot,
        });
        session_id
    }

    /// Submits the user's text and requests the assistant's reply.
    ///
    /// Returns `None` when the session is not active.  The returned task
    /// resolves once the reply has been applied or discarded; dropping it
    /// does not cancel the call.
    pub fn submit(&self, text: impl Into<String>) -> Option<JoinHandle<Applied>> {
        let ticket = self.lock().submit_user_message(text);
        match ticket {
            Some(ticket) => Some(self.spawn(ticket)),
            None => {
                tracing::debug!("ignoring input for an inactive session");
                None
            }
        }
    }

    /// Ends the session and, the first time, requests its summary.
    pub fn end_session(&self) -> Option<JoinHandle<Applied>> {
        let ticket = self.lock().end_session()?;
        tracing::info!("summarizing session {}", ticket.session_id);
        Some(self.spawn(ticket))
    }

    fn spawn(&self, ticket: Ticket) -> JoinHandle<Applied> {
        let state = Arc::clone(&self.state);
        let tokens = Arc::clone(&self.tokens);
        let completions = Arc::clone(&self.completions);
        let scopes = self.config.identity.api_scopes.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let reply = resolve(&ticket, tokens.as_ref(), completions.as_ref(), &scopes).await;
            let auth_failed = reply.failure == Some(FailureKind::Auth);
            let session_id = reply.session_id;
            let kind = reply.kind;
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            let applied = state.apply_reply(reply);
            // Events go out under the lock so they stay ordered with SessionStarted.
            if let Some(events) = &events {
                match &applied {
                    Applied::Appended(message) => {
                        _ = events.send(ChatEvent::Appended {
                            session_id,
                            kind,
                            message: message.clone(),
                        });
                        if auth_failed {
                            _ = events.send(ChatEvent::AuthFailed { session_id });
                        }
                    }
                    Applied::Stale => {
                        _ = events.send(ChatEvent::Discarded { session_id });
                    }
                }
            }
            drop(state);
            if applied == Applied::Stale {
                tracing::debug!("ignoring response for old session {session_id}");
            }
            applied
        })
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(events) = &self.events {
            _ = events.send(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Turns a ticket into a reply: token first, then the completion call.
///
/// Failures never escape; they become an error reply for the same session.
pub async fn resolve(
    ticket: &Ticket,
    tokens: &dyn TokenProvider,
    completions: &dyn CompletionService,
    scopes: &[String],
) -> Reply {
    let token = match tokens.acquire_token(scopes).await {
        Ok(token) => token,
        Err(err) => return Reply::failed(ticket, FailureKind::Auth, err),
    };
    match completions.send_conversation(&ticket.messages, &token).await {
        Ok(content) => Reply::completed(ticket, content),
        Err(err) if err.is_auth_fatal() => Reply::failed(ticket, FailureKind::Auth, err),
        Err(err) => Reply::failed(ticket, FailureKind::Network, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::chat::state::SessionState;
    use crate::types::{Role, Token};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, mpsc};

    /// Answers every conversation with "echo: <last message>".
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CompletionService for Echo {
        async fn send_conversation(&self, messages: &[Message], _token: &Token) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            Ok(format!("echo: {last}"))
        }
    }

    /// Waits for a go signal before answering.
    struct Gated {
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl CompletionService for Gated {
        async fn send_conversation(&self, _messages: &[Message], _token: &Token) -> Result<String> {
            self.gate.notified().await;
            Ok("late".to_string())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl CompletionService for Failing {
        async fn send_conversation(&self, _messages: &[Message], _token: &Token) -> Result<String> {
            Err(Error::api(503, "warming up"))
        }
    }

    struct NoToken;

    #[async_trait::async_trait]
    impl TokenProvider for NoToken {
        async fn acquire_token_silent(&self, _scopes: &[String]) -> Result<Token> {
            Err(Error::authentication("signed out"))
        }

        async fn acquire_token_interactive(&self, _scopes: &[String]) -> Result<Token> {
            Err(Error::authentication("signed out"))
        }
    }

    /// Waits for a go signal, then fails like an expired sign-in.
    struct GatedNoToken {
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl TokenProvider for GatedNoToken {
        async fn acquire_token_silent(&self, _scopes: &[String]) -> Result<Token> {
            Err(Error::interaction_required("no cached token"))
        }

        async fn acquire_token_interactive(&self, _scopes: &[String]) -> Result<Token> {
            self.gate.notified().await;
            Err(Error::authentication("signed out"))
        }
    }

    fn chat_with(completions: Arc<dyn CompletionService>) -> Chat {
        Chat::new(
            AppConfig::new(),
            Arc::new(StaticTokenProvider::new("tok")),
            completions,
        )
        .unwrap()
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn new_chat_starts_first_session() {
        let chat = chat_with(echo());
        let state = chat.snapshot();
        assert_eq!(state.session_id(), Some(0));
        assert_eq!(state.state(), SessionState::Active);
        assert_eq!(state.chatbot().map(|b| b.bot_type.as_str()), Some("Therapist"));
    }

    #[tokio::test]
    async fn submit_appends_reply() {
        let chat = chat_with(echo());
        let applied = chat.submit("hello").unwrap().await.unwrap();
        assert_eq!(applied, Applied::Appended(Message::assistant("echo: hello")));

        let state = chat.snapshot();
        assert!(!state.is_awaiting_response());
        assert_eq!(state.messages().len(), 4);
    }

    #[tokio::test]
    async fn orphaned_call_is_discarded() {
        let gate = Arc::new(Notify::new());
        let chat = chat_with(Arc::new(Gated { gate: gate.clone() }));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chat = chat.with_events(tx);

        let pending = chat.submit("hello").unwrap();
        let new_id = chat.start_session().unwrap();
        assert_eq!(new_id, 1);
        let before = chat.snapshot().messages().to_vec();

        gate.notify_one();
        assert_eq!(pending.await.unwrap(), Applied::Stale);
        assert_eq!(chat.snapshot().messages(), &before[..]);

        assert!(matches!(
            rx.recv().await,
            Some(ChatEvent::SessionStarted { session_id: 1, .. })
        ));
        assert_eq!(rx.recv().await, Some(ChatEvent::Discarded { session_id: 0 }));
    }

    #[tokio::test]
    async fn orphaned_auth_failure_is_discarded() {
        let gate = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chat = Chat::new(
            AppConfig::new(),
            Arc::new(GatedNoToken { gate: gate.clone() }),
            echo(),
        )
        .unwrap()
        .with_events(tx);

        let pending = chat.submit("hello").unwrap();
        assert_eq!(chat.start_session().unwrap(), 1);
        let before = chat.snapshot().messages().to_vec();

        gate.notify_one();
        assert_eq!(pending.await.unwrap(), Applied::Stale);
        assert_eq!(chat.snapshot().messages(), &before[..]);
        assert_eq!(chat.snapshot().messages().len(), 2);

        assert!(matches!(
            rx.recv().await,
            Some(ChatEvent::SessionStarted { session_id: 1, .. })
        ));
        assert_eq!(rx.recv().await, Some(ChatEvent::Discarded { session_id: 0 }));
        drop(chat);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn events_follow_session_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chat = chat_with(echo()).with_events(tx);
        let mut pending = Vec::new();
        for _ in 0..200 {
            pending.push(chat.submit("hello").unwrap());
            chat.start_session().unwrap();
        }
        for handle in pending {
            handle.await.unwrap();
        }
        drop(chat);

        let mut current = 0;
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::SessionStarted { session_id, .. } => current = session_id,
                ChatEvent::Appended { session_id, .. } => assert_eq!(session_id, current),
                ChatEvent::Discarded { session_id } => assert!(session_id < current),
                ChatEvent::AuthFailed { .. } => panic!("static tokens never fail"),
            }
        }
        assert_eq!(current, 200);
    }

    #[tokio::test]
    async fn start_session_keeps_current_bot() {
        let chat = chat_with(echo());
        chat.select_chatbot("Translator").unwrap();
        assert_eq!(chat.start_session().unwrap(), 2);
        assert_eq!(
            chat.snapshot().chatbot().map(|b| b.bot_type.as_str()),
            Some("Translator")
        );
    }

    #[tokio::test]
    async fn network_failure_becomes_assistant_message() {
        let chat = chat_with(Arc::new(Failing));
        let applied = chat.submit("hello").unwrap().await.unwrap();
        assert_eq!(
            applied,
            Applied::Appended(Message::assistant(
                "Sorry, but I'm having some issues right now (HTTP error 503 warming up)"
            ))
        );
        assert!(chat.submit("again").is_some());
    }

    #[tokio::test]
    async fn token_failure_reports_auth_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chat = Chat::new(AppConfig::new(), Arc::new(NoToken), echo())
            .unwrap()
            .with_events(tx);

        let applied = chat.submit("hello").unwrap().await.unwrap();
        match applied {
            Applied::Appended(message) => {
                assert_eq!(message.role, Role::Assistant);
                assert!(message.content.contains("signed out"));
            }
            Applied::Stale => panic!("reply should apply to the live session"),
        }
        assert!(!chat.snapshot().is_awaiting_response());
        assert!(matches!(rx.recv().await, Some(ChatEvent::Appended { .. })));
        assert_eq!(rx.recv().await, Some(ChatEvent::AuthFailed { session_id: 0 }));
    }

    #[tokio::test]
    async fn end_session_summarizes_once() {
        let completions = echo();
        let chat = chat_with(completions.clone());
        chat.submit("I feel anxious").unwrap().await.unwrap();

        let summary = chat.end_session().unwrap().await.unwrap();
        assert!(matches!(summary, Applied::Appended(_)));
        assert!(chat.end_session().is_none());
        assert!(chat.submit("more").is_none());
        assert_eq!(completions.calls.load(Ordering::SeqCst), 2);
        assert_eq!(chat.snapshot().state(), SessionState::Summarized);
    }

    #[tokio::test]
    async fn select_chatbot_switches_and_restarts() {
        let chat = chat_with(echo());
        let id = chat.select_chatbot("Translator").unwrap();
        assert_eq!(id, 1);
        let state = chat.snapshot();
        assert_eq!(state.chatbot().map(|b| b.name.as_str()), Some("Alex"));
        assert_eq!(
            state.messages()[1],
            Message::assistant("What language shall I translate to?")
        );

        let err = chat.select_chatbot("Pirate").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(chat.snapshot().session_id(), Some(1));
    }

    #[test]
    fn new_rejects_empty_config() {
        let config = AppConfig::new().with_chatbots(Vec::new());
        let result = Chat::new(config, Arc::new(StaticTokenProvider::new("t")), echo());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn resolve_passes_token_and_snapshot() {
        struct Recording;

        #[async_trait::async_trait]
        impl CompletionService for Recording {
            async fn send_conversation(&self, messages: &[Message], token: &Token) -> Result<String> {
                Ok(format!("{}:{}", token.as_str(), messages.len()))
            }
        }

        let ticket = Ticket {
            session_id: 7,
            kind: TicketKind::Reply,
            messages: vec![Message::system("s"), Message::user("u")],
        };
        let reply = resolve(
            &ticket,
            &StaticTokenProvider::new("abc"),
            &Recording,
            &["Chat.chat".to_string()],
        )
        .await;
        assert_eq!(reply.session_id, 7);
        assert_eq!(reply.content, "abc:2");
        assert!(reply.failure.is_none());
    }
}
