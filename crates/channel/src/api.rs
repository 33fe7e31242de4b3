//! REST client for the generation endpoints.
//!
//! Wraps the record-mutation API calls that enqueue remote generation
//! jobs using [`reqwest`]. The tracker only sees the
//! [`GenerationApi`] trait so tests can script responses.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use verse_core::job::JobKind;

/// Enqueues remote generation jobs.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// Ask the backend to start a `kind` job for `entity_id`.
    async fn start_generation(
        &self,
        kind: JobKind,
        entity_id: &str,
    ) -> Result<StartResponse, GenerationApiError>;
}

/// Response returned after the backend queued a job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// Server-side job id. Must equal the locally derived one.
    pub job_id: String,
    /// Queue state reported by the backend (e.g. `"waiting"`).
    pub state: String,
}

/// Error body the backend sends with non-2xx responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    message: String,
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The configured base URL cannot carry the endpoint path.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// The backend returned a non-2xx status code.
    #[error("{message} (status {status})")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Backend message, or the raw body when it was not JSON.
        message: String,
    },
}

/// HTTP client for the generation endpoints.
pub struct HttpGenerationApi {
    client: reqwest::Client,
    api_url: String,
    access_token: Option<String>,
}

impl HttpGenerationApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:3000`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    fn request(
        &self,
        kind: JobKind,
        entity_id: &str,
    ) -> Result<reqwest::RequestBuilder, GenerationApiError> {
        let builder = match kind {
            JobKind::Text => self
                .client
                .post(self.endpoint(&["poem"])?)
                .json(&serde_json::json!({ "journalId": entity_id })),
            JobKind::Audio => self
                .client
                .post(self.endpoint(&["poem", entity_id, "audio"])?),
        };
        Ok(match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    // ---- private helpers ----

    /// `api_url` extended by `segments`, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GenerationApiError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| GenerationApiError::InvalidUrl(format!("{}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|()| GenerationApiError::InvalidUrl(format!("{} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Ensure the response has a success status code, turning the error
    /// body into a [`GenerationApiError::Api`] otherwise.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GenerationApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationApiError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationApi for HttpGenerationApi {
    async fn start_generation(
        &self,
        kind: JobKind,
        entity_id: &str,
    ) -> Result<StartResponse, GenerationApiError> {
        let response = self.request(kind, entity_id)?.send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<StartResponse>().await?)
    }
}

/// Pull `message` out of a JSON error body, falling back to the body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.to_string())
}
