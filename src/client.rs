use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{COMPLETION_DURATION, COMPLETION_ERRORS, COMPLETION_REQUESTS};
use crate::types::{Message, Token};

const CHAT_PATH: &str = "chat";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A remote service that continues a conversation.
#[async_trait::async_trait]
pub trait CompletionService: Send + Sync {
    /// Send the conversation and return the assistant's reply as plain text.
    async fn send_conversation(&self, messages: &[Message], token: &Token) -> Result<String>;
}

/// HTTP client for the chat completion endpoint.
///
/// The endpoint takes a JSON array of `{role, content}` objects and answers
/// with the reply as an opaque text body.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: ReqwestClient,
    chat_url: Url,
    timeout: Duration,
}

impl CompletionClient {
    /// Create a new client for the API rooted at `api_url`.
    pub fn new(api_url: &str) -> Result<Self> {
        Self::with_options(api_url, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(api_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let chat_url = chat_url(api_url)?;
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            chat_url,
            timeout,
        })
    }

    /// The full URL conversations are posted to.
    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    /// Create and return the headers for a request authorized by `token`.
    fn headers(token: &Token) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| Error::authentication("token is not a valid header value"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Convert a non-success response into an error carrying the raw body.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        match status_code {
            401 => Error::authentication(format!("HTTP error {status_code} {body}")),
            403 => Error::permission(format!("HTTP error {status_code} {body}")),
            408 => Error::timeout(format!("HTTP error {status_code} {body}"), None),
            _ => Error::api(status_code, body),
        }
    }

    async fn post(&self, messages: &[Message], token: &Token) -> Result<String> {
        let response = self
            .client
            .post(self.chat_url.clone())
            .headers(Self::headers(token)?)
            .json(messages)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(
                        format!("Request timed out: {}", e),
                        Some(self.timeout.as_secs_f64()),
                    )
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        response.text().await.map_err(|e| {
            Error::http_client(
                format!("Failed to read response: {}", e),
                Some(Box::new(e)),
            )
        })
    }
}

#[async_trait::async_trait]
impl CompletionService for CompletionClient {
    async fn send_conversation(&self, messages: &[Message], token: &Token) -> Result<String> {
        COMPLETION_REQUESTS.click();
        let start = Instant::now();
        tracing::debug!(
            "posting {} messages to {}",
            messages.len(),
            self.chat_url
        );
        let result = self.post(messages, token).await;
        COMPLETION_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            COMPLETION_ERRORS.click();
            tracing::warn!("completion request failed: {err}");
        }
        result
    }
}

/// Resolve `{api_url}/chat`, tolerating a missing trailing slash.
fn chat_url(api_url: &str) -> Result<Url> {
    let mut base = Url::parse(api_url)?;
    if base.cannot_be_a_base() {
        return Err(Error::url(format!("{api_url} cannot be a base URL"), None));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(CHAT_PATH)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn client_creation() {
        let client = CompletionClient::new("https://api.example.com").unwrap();
        assert_eq!(client.chat_url().as_str(), "https://api.example.com/chat");
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);

        let client = CompletionClient::with_options(
            "https://api.example.com/v1/",
            Some(Duration::from_secs(30)),
        )
        .unwrap();
        assert_eq!(client.chat_url().as_str(), "https://api.example.com/v1/chat");
        assert_eq!(client.timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_api_url() {
        assert!(CompletionClient::new("not a url").is_err());
        assert!(CompletionClient::new("mailto:someone@example.com").is_err());
    }

    /// Serve exactly one canned HTTP response and hand back the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(end) = find_header_end(&request) {
                    let headers = String::from_utf8_lossy(&request[..end]).to_lowercase();
                    let length = headers
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                } else if n == 0 {
                    break;
                }
            }
            let response = format!(
                "{status_line}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn find_header_end(request: &[u8]) -> Option<usize> {
        request.windows(4).position(|w| w == b"\r\n\r\n")
    }

    #[tokio::test]
    async fn posts_conversation_with_bearer_token() {
        let (url, server) = serve_once("HTTP/1.1 200 OK", "Tell me more.").await;
        let client = CompletionClient::new(&url).unwrap();
        let messages = vec![Message::system("ctx"), Message::user("I feel anxious")];

        let reply = client
            .send_conversation(&messages, &Token::new("tok123"))
            .await
            .unwrap();
        assert_eq!(reply, "Tell me more.");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /chat HTTP/1.1"));
        let lower = request.to_lowercase();
        assert!(lower.contains("authorization: bearer tok123"));
        assert!(lower.contains("content-type: application/json"));
        assert!(request.contains(
            r#"[{"role":"system","content":"ctx"},{"role":"user","content":"I feel anxious"}]"#
        ));
    }

    #[tokio::test]
    async fn error_status_keeps_raw_body() {
        let (url, server) = serve_once("HTTP/1.1 500 Internal Server Error", "model exploded").await;
        let client = CompletionClient::new(&url).unwrap();

        let err = client
            .send_conversation(&[Message::user("hi")], &Token::new("tok"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.to_string(), "HTTP error 500 model exploded");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_is_fatal_auth_error() {
        let (url, server) = serve_once("HTTP/1.1 401 Unauthorized", "Token has expired").await;
        let client = CompletionClient::new(&url).unwrap();

        let err = client
            .send_conversation(&[Message::user("hi")], &Token::new("tok"))
            .await
            .unwrap_err();
        assert!(err.is_authentication());
        assert!(err.to_string().contains("HTTP error 401 Token has expired"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn forbidden_keeps_status_in_message() {
        let (url, server) = serve_once("HTTP/1.1 403 Forbidden", "missing Chat.chat").await;
        let client = CompletionClient::new(&url).unwrap();

        let err = client
            .send_conversation(&[Message::user("hi")], &Token::new("tok"))
            .await
            .unwrap_err();
        assert!(err.is_permission());
        assert_eq!(err.to_string(), "Permission error: HTTP error 403 missing Chat.chat");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = CompletionClient::new(&format!("http://{addr}")).unwrap();
        let err = client
            .send_conversation(&[Message::user("hi")], &Token::new("tok"))
            .await
            .unwrap_err();
        assert!(err.is_connection() || matches!(err, Error::HttpClient { .. }));
    }
}
