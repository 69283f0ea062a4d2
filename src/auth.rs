//! Token acquisition for the completion endpoint.
//!
//! The identity provider is opaque to this crate.  A [`TokenProvider`] only
//! promises two paths: a silent one that may answer from a cache, and an
//! interactive one that may involve the user.  [`TokenProvider::acquire_token`]
//! tries the silent path first and falls back to the interactive path only
//! when the silent path reports [`Error::InteractionRequired`].

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use time::{Duration, OffsetDateTime};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::observability::{TOKEN_ERRORS, TOKEN_INTERACTIVE, TOKEN_SILENT};
use crate::types::Token;

/// Tokens expiring within this window are treated as already expired.
const EXPIRY_SKEW: Duration = Duration::seconds(60);

/// A source of access tokens.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Acquire a token without user interaction.
    ///
    /// Fails with [`Error::InteractionRequired`] when the user has to take
    /// part; any other error is fatal.
    async fn acquire_token_silent(&self, scopes: &[String]) -> Result<Token>;

    /// Acquire a token, involving the user if necessary.
    async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<Token>;

    /// Acquire a token silently, falling back to the interactive flow.
    async fn acquire_token(&self, scopes: &[String]) -> Result<Token> {
        match self.acquire_token_silent(scopes).await {
            Ok(token) => {
                TOKEN_SILENT.click();
                Ok(token)
            }
            Err(err) if err.is_interaction_required() => {
                tracing::debug!("silent token acquisition needs interaction: {err}");
                TOKEN_INTERACTIVE.click();
                let result = self.acquire_token_interactive(scopes).await;
                if let Err(err) = &result {
                    TOKEN_ERRORS.click();
                    tracing::warn!("interactive token acquisition failed: {err}");
                }
                result
            }
            Err(err) => {
                TOKEN_ERRORS.click();
                tracing::warn!("token acquisition failed: {err}");
                Err(err)
            }
        }
    }

    /// Forget any cached credentials.
    fn sign_out(&self) {}
}

/// A provider that always hands out the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: Token,
}

impl StaticTokenProvider {
    /// Creates a provider for a fixed token.
    pub fn new(token: impl Into<Token>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire_token_silent(&self, _scopes: &[String]) -> Result<Token> {
        Ok(self.token.clone())
    }

    async fn acquire_token_interactive(&self, _scopes: &[String]) -> Result<Token> {
        Err(Error::authentication(
            "static token provider cannot sign in interactively",
        ))
    }
}

/// The interactive half of a [`CachedTokenProvider`].
#[async_trait::async_trait]
pub trait TokenPrompt: Send + Sync {
    /// Obtain a fresh token for `scopes`, involving the user if needed.
    async fn prompt(&self, scopes: &[String]) -> Result<Token>;
}

/// A provider that caches the last token and refreshes it interactively.
///
/// The silent path answers from the cache while the cached token is
/// unexpired; otherwise it reports [`Error::InteractionRequired`] and the
/// interactive path asks the [`TokenPrompt`] for a new token.
pub struct CachedTokenProvider<P: TokenPrompt> {
    prompt: P,
    cache: Mutex<Option<Token>>,
}

impl<P: TokenPrompt> CachedTokenProvider<P> {
    /// Creates a provider with an empty cache.
    pub fn new(prompt: P) -> Self {
        Self {
            prompt,
            cache: Mutex::new(None),
        }
    }

    /// Seeds the cache, e.g. with a token taken from the environment.
    pub fn with_token(self, token: Option<Token>) -> Self {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = token;
        self
    }

    /// Returns the cached token, expired or not.
    pub fn cached(&self) -> Option<Token> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl<P: TokenPrompt> TokenProvider for CachedTokenProvider<P> {
    async fn acquire_token_silent(&self, _scopes: &[String]) -> Result<Token> {
        match self.cached() {
            Some(token) if !token.is_expired_at(OffsetDateTime::now_utc(), EXPIRY_SKEW) => {
                Ok(token)
            }
            Some(_) => Err(Error::interaction_required("cached token has expired")),
            None => Err(Error::interaction_required("no cached token")),
        }
    }

    async fn acquire_token_interactive(&self, scopes: &[String]) -> Result<Token> {
        let token = self.prompt.prompt(scopes).await?;
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Ok(token)
    }

    fn sign_out(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Runs an external sign-in command and reads the token from its stdout.
///
/// The command may open a browser or print a device code on stderr; its
/// stdin is detached so it never competes with the chat prompt.
#[derive(Debug, Clone)]
pub struct CommandPrompt {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandPrompt {
    /// Creates a prompt from a whitespace-separated command line.
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(String::from);
        let program = words
            .next()
            .ok_or_else(|| Error::config("token command is empty"))?;
        Ok(Self {
            program,
            args: words.collect(),
            env: Vec::new(),
        })
    }

    /// Exports `key=value` to the command, next to `CHATAPP_SCOPES`.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait::async_trait]
impl TokenPrompt for CommandPrompt {
    async fn prompt(&self, scopes: &[String]) -> Result<Token> {
        tracing::info!("running {} to sign in", self.program);
        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("CHATAPP_SCOPES", scopes.join(" "))
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|err| Error::io(format!("failed to run {}", self.program), err))?;
        if !output.status.success() {
            return Err(Error::authentication(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        let stdout = std::str::from_utf8(&output.stdout)?;
        let token = stdout.trim();
        if token.is_empty() {
            return Err(Error::authentication(format!(
                "{} printed no token",
                self.program
            )));
        }
        Ok(Token::new(token))
    }
}

/// A prompt for configurations without an interactive sign-in.
#[derive(Debug, Clone, Default)]
pub struct NoPrompt;

#[async_trait::async_trait]
impl TokenPrompt for NoPrompt {
    async fn prompt(&self, _scopes: &[String]) -> Result<Token> {
        Err(Error::authentication(
            "sign-in required but no token command is configured",
        ))
    }
}

#[async_trait::async_trait]
impl<P: TokenPrompt> TokenPrompt for Option<P> {
    async fn prompt(&self, scopes: &[String]) -> Result<Token> {
        match self {
            Some(prompt) => prompt.prompt(scopes).await,
            None => NoPrompt.prompt(scopes).await,
        }
    }
}
