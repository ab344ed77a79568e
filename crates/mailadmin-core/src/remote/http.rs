//! HTTP client for the backend email endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::api::{EmailApi, ListQuery};
use crate::email::{AccountId, Email, Paginated};
use crate::{Error, Result};

/// Request timeout applied to every call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope wrapping every backend response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the backend considers the call successful.
    #[serde(default = "default_success")]
    pub success: bool,
    /// Payload.
    pub data: Option<T>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Error description.
    #[serde(default)]
    pub error: Option<String>,
}

const fn default_success() -> bool {
    true
}

impl<T> ApiResponse<T> {
    fn failure_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "request failed".to_string())
    }

    /// Unwrap a successful response that must carry data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] if the backend reported a failure or sent no data.
    pub fn into_data(self) -> Result<T> {
        if !self.success {
            return Err(Error::Api(self.failure_message()));
        }
        self.data
            .ok_or_else(|| Error::Api("response carried no data".to_string()))
    }

    /// Check a response whose payload is irrelevant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] if the backend reported a failure.
    pub fn into_unit(self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(Error::Api(self.failure_message()))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResult {
    new_count: u64,
}

/// Backend REST client.
#[derive(Debug, Clone)]
pub struct HttpEmailApi {
    base_url: String,
    token: Option<String>,
    http_client: Client,
}

impl HttpEmailApi {
    /// Create a client for the API rooted at `base_url` (e.g. `https://host/api`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            http_client,
        })
    }

    /// Authenticate requests with a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<ApiResponse<T>> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiResponse<serde_json::Value>>(&body)
                .map_or_else(|_| status.to_string(), |r| r.failure_message());
            debug!("Backend returned {status}: {message}");
            return Err(Error::Api(message));
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl EmailApi for HttpEmailApi {
    async fn list_emails(&self, query: &ListQuery) -> Result<Paginated<Email>> {
        let request = self.http_client.get(self.url("/emails")).query(query);
        self.send(request).await?.into_data()
    }

    async fn get_email(&self, id: &str) -> Result<Email> {
        let request = self.http_client.get(self.url(&format!("/emails/{id}")));
        self.send(request).await?.into_data()
    }

    async fn mark_read(&self, id: &str, is_read: bool) -> Result<()> {
        let request = self
            .http_client
            .patch(self.url(&format!("/emails/{id}/read")))
            .json(&json!({ "isRead": is_read }));
        self.send::<serde_json::Value>(request).await?.into_unit()
    }

    async fn mark_emails_read(&self, ids: &[String], is_read: bool) -> Result<()> {
        let request = self
            .http_client
            .post(self.url("/emails/batch/read"))
            .json(&json!({ "ids": ids, "isRead": is_read }));
        self.send::<serde_json::Value>(request).await?.into_unit()
    }

    async fn mark_starred(&self, id: &str, is_starred: bool) -> Result<()> {
        let request = self
            .http_client
            .patch(self.url(&format!("/emails/{id}/starred")))
            .json(&json!({ "isStarred": is_starred }));
        self.send::<serde_json::Value>(request).await?.into_unit()
    }

    async fn delete_email(&self, id: &str) -> Result<()> {
        let request = self.http_client.delete(self.url(&format!("/emails/{id}")));
        self.send::<serde_json::Value>(request).await?.into_unit()
    }

    async fn delete_emails(&self, ids: &[String]) -> Result<()> {
        let request = self
            .http_client
            .post(self.url("/emails/batch/delete"))
            .json(&json!({ "ids": ids }));
        self.send::<serde_json::Value>(request).await?.into_unit()
    }

    async fn refresh(&self, account_id: Option<&AccountId>) -> Result<u64> {
        let body = account_id.map_or_else(|| json!({}), |id| json!({ "accountId": id }));
        let request = self
            .http_client
            .post(self.url("/emails/refresh"))
            .json(&body);
        let result: RefreshResult = self.send(request).await?.into_data()?;
        Ok(result.new_count)
    }
}
