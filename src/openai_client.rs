use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::cli::chat::conversation_state::Role;
use crate::error::{Result, TutorError};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Sampling caps for a request. Fixed per call site, never user supplied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl SamplingParams {
    /// Tutoring turns.
    pub const CHAT: SamplingParams = SamplingParams {
        temperature: 0.7,
        max_tokens: 500,
    };

    /// Quiz generation needs room for several questions.
    pub const QUIZ: SamplingParams = SamplingParams {
        temperature: 0.7,
        max_tokens: 1500,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Anything that can turn a list of chat messages into completion text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Whether a credential is present. Callers check this before `complete`
    /// so a missing key never costs a request.
    fn is_configured(&self) -> bool;

    /// Model name to put in requests.
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Client for the OpenAI chat completions endpoint.
pub struct OpenAiClient {
    api_key: Option<String>,
    endpoint: Url,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>, endpoint: Url, model: String) -> Self {
        Self::with_http_client(api_key, endpoint, model, reqwest::Client::new())
    }

    pub fn with_http_client(
        api_key: Option<String>,
        endpoint: Url,
        model: String,
        client: reqwest::Client,
    ) -> Self {
        // an empty key is the same as no key
        let api_key = api_key.filter(|key| !key.trim().is_empty());

        Self {
            api_key,
            endpoint,
            model,
            client,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or(TutorError::RemoteUnavailable)?;

        debug!(
            "Sending request to completion API: {}",
            serde_json::to_string_pretty(request).unwrap_or_default()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| TutorError::RemoteRequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TutorError::RemoteRequestFailed(e.to_string()))?;

        if !status.is_success() {
            error!("API request failed with status {}: {}", status, body);
            let message = error_message(&body).unwrap_or_else(|| "Unknown error".to_string());
            return Err(TutorError::RemoteRequestFailed(message));
        }

        debug!("Received response from completion API: {}", body);

        // some proxies report failures inside a 200
        if let Some(message) = error_message(&body) {
            error!("API returned an error envelope with status {}: {}", status, message);
            return Err(TutorError::RemoteRequestFailed(message));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Malformed completion payload: {}", e);
            TutorError::RemoteRequestFailed(format!("malformed response: {}", e))
        })?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default())
    }
}

fn error_message(body: &str) -> Option<String> {
    let error = serde_json::from_str::<ErrorEnvelope>(body).ok()?.error?;
    Some(error.message.unwrap_or_else(|| "Unknown error".to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Backend double that replays canned results and records requests.
    pub(crate) struct MockBackend {
        configured: bool,
        replies: Mutex<Vec<Result<String>>>,
        pub calls: AtomicUsize,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockBackend {
        pub(crate) fn replying(replies: Vec<Result<String>>) -> Self {
            Self {
                configured: true,
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn unconfigured() -> Self {
            Self {
                configured: false,
                ..Self::replying(Vec::new())
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn last_request(&self) -> Option<CompletionRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        fn is_configured(&self) -> bool {
            self.configured
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(String::new())
            } else {
                replies.remove(0)
            }
        }
    }

    /// Serve exactly one HTTP response on a local port and hand back the raw
    /// request that was received.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if request_complete(&received) {
                    break;
                }
            }
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received).to_string()
        });
        let url = Url::parse(&format!("http://{}/v1/chat/completions", addr)).unwrap();
        (url, handle)
    }

    fn request_complete(received: &[u8]) -> bool {
        let text = String::from_utf8_lossy(received);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        received.len() >= split + 4 + content_length
    }

    fn local_client(url: Url) -> OpenAiClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        OpenAiClient::with_http_client(Some("sk-test".into()), url, DEFAULT_MODEL.into(), http)
    }

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![
                ChatMessage::new(Role::System, "be a tutor"),
                ChatMessage::new(Role::User, "What is NET?"),
            ],
            temperature: SamplingParams::CHAT.temperature,
            max_tokens: SamplingParams::CHAT.max_tokens,
        }
    }

    #[test]
    fn blank_key_counts_as_unconfigured() {
        let url = Url::parse(DEFAULT_ENDPOINT).unwrap();
        let client = OpenAiClient::new(Some("   ".to_string()), url.clone(), DEFAULT_MODEL.into());
        assert!(!client.is_configured());
        let client = OpenAiClient::new(Some("sk-test".to_string()), url, DEFAULT_MODEL.into());
        assert!(client.is_configured());
    }

    #[tokio::test]
    async fn missing_key_fails_without_request() {
        // nothing listens here; reaching the network would surface a transport error
        let url = Url::parse("http://127.0.0.1:9/v1/chat/completions").unwrap();
        let client = OpenAiClient::new(None, url, DEFAULT_MODEL.into());
        let err = client.complete(&sample_request()).await.unwrap_err();
        assert!(matches!(err, TutorError::RemoteUnavailable));
    }

    #[tokio::test]
    async fn posts_bearer_authenticated_json_and_reads_first_choice() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Paper 1 is general."}}]}"#,
        )
        .await;
        let client = local_client(url);

        let text = client.complete(&sample_request()).await.unwrap();
        assert_eq!(text, "Paper 1 is general.");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.to_lowercase().contains("authorization: bearer sk-test"));
        assert!(raw.contains(r#""model":"gpt-3.5-turbo""#));
        assert!(raw.contains(r#""max_tokens":500"#));
        assert!(raw.contains(r#""role":"system""#));
    }

    #[tokio::test]
    async fn error_status_propagates_remote_message() {
        let (url, _server) = serve_once(
            "HTTP/1.1 429 Too Many Requests",
            r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#,
        )
        .await;
        let client = local_client(url);

        let err = client.complete(&sample_request()).await.unwrap_err();
        match err {
            TutorError::RemoteRequestFailed(message) => assert_eq!(message, "Rate limit reached"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_without_envelope_is_unknown_error() {
        let (url, _server) = serve_once("HTTP/1.1 500 Internal Server Error", "oops").await;
        let client = local_client(url);

        let err = client.complete(&sample_request()).await.unwrap_err();
        assert_eq!(err.to_string(), "OpenAI API error: Unknown error");
    }

    #[tokio::test]
    async fn empty_choices_yield_empty_text() {
        let (url, _server) = serve_once("HTTP/1.1 200 OK", r#"{"choices":[]}"#).await;
        let client = local_client(url);

        assert_eq!(client.complete(&sample_request()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn malformed_payload_is_a_request_failure() {
        let (url, _server) = serve_once("HTTP/1.1 200 OK", "not json").await;
        let client = local_client(url);

        let err = client.complete(&sample_request()).await.unwrap_err();
        assert!(matches!(err, TutorError::RemoteRequestFailed(_)));
    }

    #[tokio::test]
    async fn success_status_with_error_envelope_is_a_request_failure() {
        let (url, _server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"error":{"message":"quota exceeded"}}"#,
        )
        .await;
        let client = local_client(url);

        let err = client.complete(&sample_request()).await.unwrap_err();
        match err {
            TutorError::RemoteRequestFailed(message) => assert_eq!(message, "quota exceeded"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn payload_without_choices_is_a_request_failure() {
        let (url, _server) = serve_once("HTTP/1.1 200 OK", "{}").await;
        let client = local_client(url);

        let err = client.complete(&sample_request()).await.unwrap_err();
        assert!(matches!(err, TutorError::RemoteRequestFailed(_)));
    }
}
