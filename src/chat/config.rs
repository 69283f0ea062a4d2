//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the immutable
//! application configuration: branding, identity-provider settings, the
//! completion endpoint and the list of chatbots.

use std::collections::HashSet;
use std::env;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};
use url::Url;
use utf8path::Path;

use crate::auth::CommandPrompt;
use crate::error::{Error, Result};
use crate::types::ChatBot;

/// Default application name.
const DEFAULT_APP_NAME: &str = "Chat App";

/// Default API root; the completion endpoint is `{api_url}/chat`.
const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Default scope requested for the chat API.
const DEFAULT_API_SCOPE: &str = "Chat.chat";

/// Environment variable overriding the configured API root.
pub const API_URL_ENV: &str = "CHATAPP_API_URL";

/// Command-line arguments for the chatapp tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Path to a YAML configuration file.
    #[arrrg(optional, "YAML configuration file", "FILE")]
    pub config: Option<String>,

    /// Root URL of the chat API.
    #[arrrg(optional, "Chat API root URL (default: http://localhost:5000)", "URL")]
    pub api_url: Option<String>,

    /// Type of the chatbot to start with.
    #[arrrg(optional, "Chatbot type to start with (default: first configured)", "TYPE")]
    pub bot: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Log debug output to stderr.
    #[arrrg(flag, "Log debug output to stderr")]
    pub verbose: bool,
}

/// Identity-provider settings.
///
/// The provider itself is opaque; these values are handed to whatever
/// performs the sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// The application (client) id registered with the provider.
    pub client_id: String,

    /// The authority that issues tokens.
    pub authority: String,

    /// Authorities trusted besides `authority`.
    pub known_authorities: Vec<String>,

    /// Scopes requested when signing in.
    pub login_scopes: Vec<String>,

    /// Scopes requested for the chat API access token.
    pub api_scopes: Vec<String>,

    /// Command that prints a fresh access token on stdout.
    pub token_command: Option<String>,
}

impl IdentityConfig {
    /// The interactive sign-in for these settings, if a token command is set.
    ///
    /// The command sees the provider settings as `CHATAPP_CLIENT_ID`,
    /// `CHATAPP_AUTHORITY`, `CHATAPP_KNOWN_AUTHORITIES` and
    /// `CHATAPP_LOGIN_SCOPES` (lists are space-separated).
    pub fn token_prompt(&self) -> Result<Option<CommandPrompt>> {
        let Some(command) = &self.token_command else {
            return Ok(None);
        };
        let prompt = CommandPrompt::parse(command)?
            .with_env("CHATAPP_CLIENT_ID", &self.client_id)
            .with_env("CHATAPP_AUTHORITY", &self.authority)
            .with_env("CHATAPP_KNOWN_AUTHORITIES", self.known_authorities.join(" "))
            .with_env("CHATAPP_LOGIN_SCOPES", self.login_scopes.join(" "));
        Ok(Some(prompt))
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            authority: String::new(),
            known_authorities: Vec::new(),
            login_scopes: vec!["openid".to_string(), "profile".to_string()],
            api_scopes: vec![DEFAULT_API_SCOPE.to_string()],
            token_command: None,
        }
    }
}

/// Configuration for the chat application.
///
/// Loaded once at start-up and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name shown in the banner.
    pub app_name: String,

    /// Optional logo, printed above the banner title.
    pub logo: Option<String>,

    /// Identity-provider settings.
    pub identity: IdentityConfig,

    /// Root URL of the chat API.
    pub api_url: String,

    /// The chatbots the user can pick from.  The first one is the default.
    pub chatbots: Vec<ChatBot>,
}

impl AppConfig {
    /// Creates the built-in configuration.
    pub fn new() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            logo: None,
            identity: IdentityConfig::default(),
            api_url: DEFAULT_API_URL.to_string(),
            chatbots: ChatBot::defaults(),
        }
    }

    /// Loads and validates a configuration file.
    ///
    /// Fields missing from the file keep their built-in defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_str())
            .map_err(|err| Error::io(format!("failed to read {}", path.as_str()), err))?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from command-line arguments and environment.
    ///
    /// Precedence for the API root: `--api-url`, then `CHATAPP_API_URL`, then
    /// the file, then the built-in default.
    pub fn from_args(args: &ChatArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(&Path::from(path.as_str()))?,
            None => Self::new(),
        };
        if let Ok(api_url) = env::var(API_URL_ENV) {
            config.api_url = api_url;
        }
        if let Some(api_url) = &args.api_url {
            config.api_url = api_url.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the API root.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Replaces the chatbots.
    pub fn with_chatbots(mut self, chatbots: Vec<ChatBot>) -> Self {
        self.chatbots = chatbots;
        self
    }

    /// Sets the scopes requested for the chat API.
    pub fn with_api_scopes(mut self, scopes: Vec<String>) -> Self {
        self.identity.api_scopes = scopes;
        self
    }

    /// Looks up a chatbot by its type.
    pub fn chatbot(&self, bot_type: &str) -> Option<&ChatBot> {
        self.chatbots.iter().find(|bot| bot.bot_type == bot_type)
    }

    /// The chatbot sessions start with.
    pub fn default_chatbot(&self) -> Option<&ChatBot> {
        self.chatbots.first()
    }

    /// Checks the invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        if self.chatbots.is_empty() {
            return Err(Error::config("at least one chatbot must be configured"));
        }
        let mut seen = HashSet::new();
        for bot in &self.chatbots {
            if bot.bot_type.is_empty() {
                return Err(Error::config("chatbot type must not be empty"));
            }
            if !seen.insert(bot.bot_type.as_str()) {
                return Err(Error::config(format!(
                    "chatbot type {} is configured twice",
                    bot.bot_type
                )));
            }
        }
        Url::parse(&self.api_url)
            .map_err(|err| Error::config(format!("invalid api_url {}: {err}", self.api_url)))?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenPrompt;

    #[test]
    fn default_config() {
        let config = AppConfig::new();
        assert_eq!(config.app_name, "Chat App");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.identity.api_scopes, vec!["Chat.chat".to_string()]);
        assert_eq!(config.chatbots.len(), 2);
        assert_eq!(
            config.default_chatbot().map(|b| b.bot_type.as_str()),
            Some("Therapist")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn chatbot_lookup() {
        let config = AppConfig::new();
        assert_eq!(
            config.chatbot("Translator").map(|b| b.name.as_str()),
            Some("Alex")
        );
        assert!(config.chatbot("Pirate").is_none());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
app_name: Bots
api_url: https://chat.example.com/api
identity:
  client_id: abc
  api_scopes: [Chat.chat, Chat.read]
  token_command: az account get-access-token
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.app_name, "Bots");
        assert_eq!(config.identity.client_id, "abc");
        assert_eq!(config.identity.api_scopes.len(), 2);
        assert_eq!(
            config.identity.login_scopes,
            vec!["openid".to_string(), "profile".to_string()]
        );
        assert_eq!(config.chatbots, ChatBot::defaults());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let empty = AppConfig::new().with_chatbots(Vec::new());
        assert!(empty.validate().unwrap_err().is_config());

        let mut bots = ChatBot::defaults();
        bots.push(bots[0].clone());
        let duplicate = AppConfig::new().with_chatbots(bots);
        assert!(duplicate.validate().unwrap_err().is_config());

        let bad_url = AppConfig::new().with_api_url("not a url");
        assert!(bad_url.validate().unwrap_err().is_config());
    }

    #[test]
    fn from_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("chatapp-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chatapp.yaml");
        let config = AppConfig::new().with_api_url("https://chat.example.com");
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = AppConfig::from_file(&Path::from(path.to_str().unwrap())).unwrap();
        assert_eq!(loaded, config);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AppConfig::from_file(&Path::from("/nonexistent/chatapp.yaml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn no_token_command_means_no_prompt() {
        assert!(IdentityConfig::default().token_prompt().unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_prompt_sees_identity_settings() {
        let identity = IdentityConfig {
            client_id: "client-123".to_string(),
            authority: "https://login.example.com/tenant".to_string(),
            known_authorities: vec!["login.example.com".to_string(), "b2c.example.com".to_string()],
            token_command: Some("printenv CHATAPP_KNOWN_AUTHORITIES".to_string()),
            ..IdentityConfig::default()
        };
        let prompt = identity.token_prompt().unwrap().unwrap();
        let token = prompt.prompt(&identity.api_scopes).await.unwrap();
        assert_eq!(token.as_str(), "login.example.com b2c.example.com");

        let identity = IdentityConfig {
            token_command: Some("printenv CHATAPP_LOGIN_SCOPES".to_string()),
            ..identity
        };
        let prompt = identity.token_prompt().unwrap().unwrap();
        let token = prompt.prompt(&identity.api_scopes).await.unwrap();
        assert_eq!(token.as_str(), "openid profile");
    }

    #[test]
    fn args_override_api_url() {
        let args = ChatArgs {
            api_url: Some("https://override.example.com".to_string()),
            ..ChatArgs::default()
        };
        let config = AppConfig::from_args(&args).unwrap();
        assert_eq!(config.api_url, "https://override.example.com");
    }
}
