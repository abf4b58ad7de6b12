//! OpenRouter LLM client implementation
//!
//! Provides the async HTTP client used for article synthesis and embedding
//! generation, with rate-limit handling and jittered exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::types::{
    ChatRequest, ChatResponse, Embedding, EmbeddingRequest, EmbeddingResponse, LlmResponse, Message,
};
use super::{Embedder, GenerationProvider};

/// OpenRouter API base URL
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Maximum number of retry attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// OpenRouter LLM client
///
/// Thread-safe client for chat completion and embedding requests. Requests
/// are blocking I/O with a configured timeout; rate-limited calls retry with
/// jittered exponential backoff before surfacing the error.
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("default_model", &self.config.default_model)
            .field("embedding_model", &self.config.embedding_model)
            .finish()
    }
}

/// Builder for creating an LlmClient
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl Default for LlmClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            api_key: None,
            base_url: None,
            timeout_secs: None,
        }
    }

    /// Set the LLM configuration
    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (defaults to OpenRouter)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Build the LlmClient
    pub fn build(self) -> Result<LlmClient> {
        let config = self.config.unwrap_or_else(|| crate::config::Config::default().llm);
        let api_key = self
            .api_key
            .ok_or_else(|| Error::LlmError("API key is required".to_string()))?;

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(LlmClient {
            http_client,
            config,
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
        })
    }
}

impl LlmClient {
    /// Create a new LlmClient with the given configuration and API key
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new()
            .config(config)
            .api_key(api_key)
            .build()
    }

    /// Create a new builder for LlmClient
    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    /// Get the default model from configuration
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Get the embedding model from configuration
    pub fn embedding_model(&self) -> &str {
        &self.config.embedding_model
    }

    /// Make a chat completion request
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        model: Option<&str>,
    ) -> Result<LlmResponse> {
        let model = model.unwrap_or(&self.config.default_model);

        let request = ChatRequest::new(model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        self.execute_request(&request).await
    }

    /// Execute a chat request with retry on rate limits
    async fn execute_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a single request to the API
    async fn send_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();

        if !status.is_success() {
            return self.handle_error_response(status, response).await;
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LlmError(format!("Failed to parse response: {}", e)))?;

        LlmResponse::from_chat_response(chat_response)
            .ok_or_else(|| Error::LlmError("Empty response from API".to_string()))
    }

    /// Generate an embedding for a single text
    pub async fn embed(&self, text: &str, model: Option<&str>) -> Result<Embedding> {
        let model = model.unwrap_or(&self.config.embedding_model);

        let request = EmbeddingRequest::new(model, text);
        let mut embeddings = self.execute_embedding_request(&request).await?;

        embeddings
            .pop()
            .ok_or_else(|| Error::EmbeddingFailed("Empty embedding response".to_string()))
    }

    /// Generate embeddings for multiple texts in a batch
    ///
    /// More efficient than calling embed() once per text; the pattern
    /// extractor embeds whole coarse groups this way.
    pub async fn embed_texts(
        &self,
        texts: Vec<String>,
        model: Option<&str>,
    ) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = model.unwrap_or(&self.config.embedding_model);
        let request = EmbeddingRequest::batch(model, texts);
        self.execute_embedding_request(&request).await
    }

    /// Execute an embedding request
    async fn execute_embedding_request(
        &self,
        request: &EmbeddingRequest,
    ) -> Result<Vec<Embedding>> {
        let url = format!("{}/embeddings", self.base_url);

        debug!(model = %request.model, inputs = request.input.len(), "Sending embedding request");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();

        if !status.is_success() {
            return self.handle_error_response(status, response).await;
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFailed(format!("Failed to parse response: {}", e)))?;

        // Sort by index to maintain input order
        let mut data = embedding_response.data;
        data.sort_by_key(|d| d.index);

        Ok(data
            .into_iter()
            .map(|d| Embedding {
                vector: d.embedding,
                model: embedding_response.model.clone(),
            })
            .collect())
    }

    /// Handle error responses from the API
    async fn handle_error_response<T>(
        &self,
        status: reqwest::StatusCode,
        response: reqwest::Response,
    ) -> Result<T> {
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => Err(Error::LlmError(
                "Unauthorized: Invalid API key. Set TICKETLORE_API_KEY or OPENROUTER_API_KEY environment variable.".to_string(),
            )),
            429 => {
                let wait_secs = extract_retry_after(&body).unwrap_or(60);
                Err(Error::RateLimited(wait_secs))
            }
            400 => Err(Error::LlmError(format!("Bad request: {}", body))),
            402 => Err(Error::LlmError(
                "Payment required: Insufficient credits on OpenRouter account".to_string(),
            )),
            403 => Err(Error::LlmError(format!("Forbidden: {}", body))),
            404 => Err(Error::LlmError(format!(
                "Model not found or endpoint unavailable: {}",
                body
            ))),
            500..=599 => Err(Error::LlmError(format!("Server error ({}): {}", status, body))),
            _ => Err(Error::LlmError(format!("HTTP error {}: {}", status, body))),
        }
    }

    /// Distinguish request timeouts from other transport failures
    fn map_transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::ProviderTimeout(self.config.timeout_secs)
        } else {
            Error::NetworkError(e)
        }
    }
}

#[async_trait]
impl GenerationProvider for LlmClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
        let response = self.complete(messages, None).await?;
        Ok(response.content)
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = LlmClient::embed(self, text, None).await?;
        Ok(embedding.vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embeddings = self.embed_texts(texts.to_vec(), None).await?;
        Ok(embeddings.into_iter().map(|e| e.vector).collect())
    }
}

/// Calculate backoff delay with jitter
fn calculate_backoff(attempt: u32, suggested_wait: u64) -> u64 {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
    let max_wait = suggested_wait * 1000; // Convert to ms

    // Use the larger of calculated backoff or suggested wait
    let delay = base.max(max_wait);

    // Add some jitter (10% random variation)
    let jitter = delay / 10;
    delay + rand::thread_rng().gen_range(0..jitter.max(1))
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(retry_after) = json.get("retry_after").and_then(|v| v.as_u64()) {
            return Some(retry_after);
        }
        if let Some(error) = json.get("error")
            && let Some(retry_after) = error.get("retry_after").and_then(|v| v.as_u64())
        {
            return Some(retry_after);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_key: None,
            default_model: "test/model".to_string(),
            embedding_model: "test/embedding".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::builder()
            .config(test_config())
            .api_key("test-key")
            .base_url("https://example.com")
            .timeout_secs(60)
            .build()
            .unwrap();

        assert_eq!(client.default_model(), "test/model");
        assert_eq!(client.embedding_model(), "test/embedding");
        assert_eq!(client.base_url, "https://example.com");
    }

    #[test]
    fn test_client_builder_requires_api_key() {
        let result = LlmClient::builder().config(test_config()).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmClient>();
    }

    #[test]
    fn test_calculate_backoff() {
        let backoff1 = calculate_backoff(1, 0);
        assert!(backoff1 >= BACKOFF_BASE_MS);

        let backoff2 = calculate_backoff(2, 0);
        assert!(backoff2 >= BACKOFF_BASE_MS * 2);

        // With suggested wait
        let backoff_with_wait = calculate_backoff(1, 5);
        assert!(backoff_with_wait >= 5000);
    }

    #[test]
    fn test_extract_retry_after() {
        let body = r#"{"retry_after": 30}"#;
        assert_eq!(extract_retry_after(body), Some(30));

        let body = r#"{"error": {"retry_after": 60}}"#;
        assert_eq!(extract_retry_after(body), Some(60));

        let body = r#"{"message": "rate limited"}"#;
        assert_eq!(extract_retry_after(body), None);
    }
}
