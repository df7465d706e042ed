use std::env;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, StatusCode, header};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_VAR: &str = "TEEBOT_API_KEY";

/// One request to the completion backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Instruction sent as the system message.
    pub system_prompt: String,
    /// The user message.
    pub user_prompt: String,
    /// Token budget for the reply.
    pub max_tokens: u32,
}

/// A remote text-generation call.
#[async_trait::async_trait]
pub trait Completer: Send + Sync {
    /// Returns the raw text of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletions {
    api_key: String,
    client: ReqwestClient,
    api_url: String,
    timeout: Duration,
}

impl ChatCompletions {
    /// Create a new client.
    ///
    /// The API key can be provided directly or read from the TEEBOT_API_KEY
    /// environment variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        api_key: Option<String>,
        api_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_VAR).map_err(|_| {
                Error::authentication(format!(
                    "API key not provided and {API_KEY_VAR} environment variable not set"
                ))
            })?,
        };
        if HeaderValue::from_str(&format!("Bearer {api_key}")).is_err() {
            return Err(Error::authentication("API key contains invalid characters"));
        }

        let api_url = api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        url::Url::parse(&api_url)?;

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
            api_key,
            client,
            api_url,
            timeout,
        })
    }

    /// The endpoint requests are posted to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::authentication("API key contains invalid characters"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<ErrorDetail>,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            #[serde(rename = "type")]
            error_type: Option<String>,
            message: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        let parsed = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.error);
        let error_type = parsed.as_ref().and_then(|e| e.error_type.clone());
        let error_message = parsed
            .and_then(|e| e.message)
            .unwrap_or_else(|| error_body.clone());

        match status_code {
            401 | 403 => Error::authentication(error_message),
            408 => Error::timeout(error_message, None),
            429 => Error::rate_limit(error_message, retry_after),
            502..=504 => Error::service_unavailable(error_message, retry_after),
            _ => Error::api(status_code, error_type, error_message),
        }
    }
}

#[async_trait::async_trait]
impl Completer for ChatCompletions {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatCompletionBody {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.api_url)
            .headers(self.default_headers()?)
            .json(&body)
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

        if response.status() != StatusCode::OK {
            return Err(Self::process_error_response(response).await);
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| {
                Error::serialization(
                    format!("Failed to parse response: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| {
                Error::serialization("response has no choices[0].message.content", None)
            })
    }
}
