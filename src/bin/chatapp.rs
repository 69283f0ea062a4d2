//! Interactive terminal front-end for chatapp.
//!
//! # Usage
//!
//! ```bash
//! # Talk to the first configured bot on the default API root
//! chatapp
//!
//! # Use a configuration file and start with the translator
//! chatapp --config chatapp.yaml --bot Translator
//!
//! # Point at another API root
//! CHATAPP_API_URL=https://chat.example.com chatapp
//! ```
//!
//! An access token may be handed in through `CHATAPP_ACCESS_TOKEN`.  When it
//! is missing or expired, `/signin` runs the configured token command.
//!
//! # Commands
//!
//! - `/new` - Start a new chat with the current bot
//! - `/bot <type>` - Switch chatbots
//! - `/end` - End the chat and summarize it
//! - `/help` - Show all commands
//! - `/quit` - Exit the application

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use chatapp::chat::{
    AppConfig, Chat, ChatArgs, ChatCommand, ChatEvent, PlainTextRenderer, Renderer, SessionId,
    TicketKind, help_text, parse_command, render_conversation,
};
use chatapp::{CachedTokenProvider, ChatBot, CompletionClient, Token, TokenProvider};

/// Environment variable holding a pre-acquired access token.
const ACCESS_TOKEN_ENV: &str = "CHATAPP_ACCESS_TOKEN";

/// What the line reader hands to the chat loop.
enum Input {
    Line(String),
    Interrupted,
    Eof,
    Failed(String),
}

/// Whether the chat loop keeps going after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Main entry point for the chatapp application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("chatapp [OPTIONS]");
    init_tracing(args.verbose);

    let config = AppConfig::from_args(&args)?;
    let prompt = config.identity.token_prompt()?;
    let seeded = std::env::var(ACCESS_TOKEN_ENV).ok().map(Token::new);
    let tokens: Arc<dyn TokenProvider> =
        Arc::new(CachedTokenProvider::new(prompt).with_token(seeded));
    let client = CompletionClient::new(&config.api_url)?;
    tracing::info!("using completion endpoint {}", client.chat_url());

    let app_name = config.app_name.clone();
    let logo = config.logo.clone();
    let scopes = config.identity.api_scopes.clone();
    let chat = Chat::new(config, Arc::clone(&tokens), Arc::new(client))?;
    if let Some(bot) = &args.bot {
        chat.select_chatbot(bot)?;
    }
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let chat = chat.with_events(event_tx);

    let mut renderer = PlainTextRenderer::with_color(!args.no_color);
    let user = tokens
        .acquire_token_silent(&scopes)
        .await
        .ok()
        .and_then(|token| token.user_name());
    renderer.print_banner(&app_name, logo.as_deref(), user.as_deref());
    renderer.print_info("Type /help for commands, /quit to exit\n");
    let state = chat.snapshot();
    render_conversation(&mut renderer, &state);
    let mut shown = state.session_id().zip(state.shared_chatbot());

    let mut lines = spawn_reader();
    loop {
        tokio::select! {
            input = lines.recv() => match input {
                Some(Input::Line(line)) => {
                    if handle_line(&line, &chat, &mut renderer).await == Flow::Quit {
                        break;
                    }
                }
                Some(Input::Interrupted) => continue,
                Some(Input::Eof) | None => {
                    println!("Goodbye!");
                    break;
                }
                Some(Input::Failed(err)) => {
                    renderer.print_error(&err);
                    break;
                }
            },
            Some(event) = events.recv() => render_event(&event, &mut shown, &mut renderer),
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads lines on a dedicated thread so replies can print while the user types.
fn spawn_reader() -> UnboundedReceiver<Input> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || read_lines(tx));
    rx
}

fn read_lines(tx: UnboundedSender<Input>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            _ = tx.send(Input::Failed(err.to_string()));
            return;
        }
    };
    loop {
        let input = match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                _ = rl.add_history_entry(line.as_str());
                Input::Line(line)
            }
            Err(ReadlineError::Interrupted) => Input::Interrupted,
            Err(ReadlineError::Eof) => Input::Eof,
            Err(err) => Input::Failed(err.to_string()),
        };
        let last = matches!(input, Input::Eof | Input::Failed(_));
        if tx.send(input).is_err() || last {
            return;
        }
    }
}

async fn handle_line(line: &str, chat: &Chat, renderer: &mut PlainTextRenderer) -> Flow {
    let Some(command) = parse_command(line) else {
        match chat.submit(line) {
            Some(_) => {
                let state = chat.snapshot();
                if state.messages().len() == 3 {
                    renderer.print_waiting();
                }
            }
            None => renderer.print_info("This chat has ended. Use /new to start another."),
        }
        return Flow::Continue;
    };

    let scopes = &chat.config().identity.api_scopes;
    match command {
        ChatCommand::Quit => {
            println!("Goodbye!");
            return Flow::Quit;
        }
        ChatCommand::New => {
            if let Err(err) = chat.start_session() {
                renderer.print_error(&err.to_string());
            }
        }
        ChatCommand::Bot(bot_type) => {
            if let Err(err) = chat.select_chatbot(&bot_type) {
                renderer.print_error(&err.to_string());
            }
        }
        ChatCommand::Bots => {
            let current = chat.snapshot().chatbot().map(|bot| bot.bot_type.clone());
            for bot in &chat.config().chatbots {
                let marker = if current.as_deref() == Some(bot.bot_type.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "  {marker} {:<12} {}, {}",
                    bot.bot_type, bot.name, bot.description
                );
            }
        }
        ChatCommand::End => match chat.end_session() {
            Some(_) => renderer.print_info("Chat ended. Summarizing..."),
            None => renderer.print_info("This chat has already ended."),
        },
        ChatCommand::History => render_conversation(renderer, &chat.snapshot()),
        ChatCommand::SignIn => match chat.tokens().acquire_token(scopes).await {
            Ok(token) => match token.user_name() {
                Some(user) => renderer.print_info(&format!("Signed in as {user}.")),
                None => renderer.print_info("Signed in."),
            },
            Err(err) => renderer.print_error(&format!("Sign-in failed: {err}")),
        },
        ChatCommand::SignOut => {
            chat.tokens().sign_out();
            renderer.print_info("Signed out.");
        }
        ChatCommand::WhoAmI => match chat.tokens().acquire_token_silent(scopes).await {
            Ok(token) => match token.user_name() {
                Some(user) => renderer.print_info(&format!("Signed in as {user}.")),
                None => renderer.print_info("Signed in with an opaque token."),
            },
            Err(_) => renderer.print_info("Not signed in. Use /signin."),
        },
        ChatCommand::Token => match chat.tokens().acquire_token_silent(scopes).await {
            Ok(token) => match token.claims() {
                Ok(claims) => {
                    for (key, value) in claims {
                        println!("    {key}: {value}");
                    }
                }
                Err(err) => renderer.print_error(&format!("Cannot decode token: {err}")),
            },
            Err(_) => renderer.print_info("Not signed in. Use /signin."),
        },
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {}", line);
            }
        }
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
    Flow::Continue
}

/// Renders `event` against the session currently on screen.
fn render_event(
    event: &ChatEvent,
    shown: &mut Option<(SessionId, Arc<ChatBot>)>,
    renderer: &mut PlainTextRenderer,
) {
    match event {
        ChatEvent::SessionStarted {
            session_id,
            chatbot,
        } => {
            renderer.print_chatbot(chatbot);
            renderer.print_message(chatbot, &chatbot.greeting_message());
            *shown = Some((*session_id, Arc::clone(chatbot)));
        }
        ChatEvent::Appended {
            session_id,
            kind,
            message,
        } => {
            let Some((_, chatbot)) = shown.as_ref().filter(|(id, _)| id == session_id) else {
                return;
            };
            if *kind == TicketKind::Summary {
                renderer.print_info("Summary of this chat:");
            }
            renderer.print_message(chatbot, message);
        }
        ChatEvent::Discarded { .. } => {}
        ChatEvent::AuthFailed { .. } => {
            renderer.print_error("Your sign-in has expired. Use /signin and try again.");
        }
    }
}
