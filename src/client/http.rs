//! REST tagging client.
//!
//! Talks to a generic JSON tagging endpoint:
//! - `GET  {base}/tags?resource={identifier}` returns `{"tags": {...}}`
//! - `POST {base}/tags/untag` with `{"resource": ..., "tagKeys": [...]}`
//! - `POST {base}/tags/tag` with `{"resource": ..., "tags": {...}}`
//!
//! Transient failures (network errors, 429, 5xx) are retried here with a
//! linear backoff; the reconciler itself never retries.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::context::ReconciliationContext;
use crate::error::{RemoteError, RemoteResult};
use crate::tags::TagSet;

use super::RemoteTagClient;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 500;

/// Upper bound for a server-requested retry delay in seconds.
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// REST tagging client.
#[derive(Debug, Clone)]
pub struct HttpTagClient {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Optional bearer token.
    token: Option<String>,
    /// Base delay between retries.
    retry_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct ListTagsResponse {
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UntagRequest<'a> {
    resource: &'a str,
    tag_keys: &'a BTreeSet<String>,
}

#[derive(Debug, Serialize)]
struct TagRequest<'a> {
    resource: &'a str,
    tags: &'a TagSet,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

impl HttpTagClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: Option<String>) -> RemoteResult<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(
        base_url: &str,
        token: Option<String>,
        timeout_secs: u64,
    ) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RemoteError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Sets the base delay between retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Sends a request, retrying transient failures.
    async fn execute<T, F>(&self, identifier: &str, build: F) -> RemoteResult<T>
    where
        T: for<'de> Deserialize<'de>,
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if let Some(err) = &last_error {
                let delay = Self::backoff(self.retry_delay, attempt, err);
                debug!("Retry attempt {attempt} of {MAX_RETRIES} in {delay:?}");
                tokio::time::sleep(delay).await;
            }

            match self.execute_once::<T>(identifier, build()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    warn!("Transient tagging API failure: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RemoteError::network("Max retries exceeded")))
    }

    /// Delay before the given attempt.
    fn backoff(base: Duration, attempt: u32, err: &RemoteError) -> Duration {
        match err {
            RemoteError::RateLimited { retry_after_secs } => {
                Duration::from_secs((*retry_after_secs).min(MAX_RETRY_AFTER_SECS))
            }
            _ => base * attempt,
        }
    }

    /// Sends a single request and decodes the response.
    async fn execute_once<T: for<'de> Deserialize<'de>>(
        &self,
        identifier: &str,
        request: RequestBuilder,
    ) -> RemoteResult<T> {
        let response = self
            .authorize(request)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("Tagging API responded with {status}");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);

            return Err(RemoteError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::AuthenticationFailed {
                message: String::from("Invalid or missing API token"),
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::ResourceNotFound {
                identifier: identifier.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map_or(body, |e| e.message);
            return Err(RemoteError::api_error(status.as_u16(), message));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::network(format!("Failed to read response: {e}")))?;

        // Mutations may answer 204 or an empty 200.
        let decoded = if body.trim().is_empty() {
            serde_json::from_value(serde_json::Value::Null)
        } else {
            serde_json::from_str(&body)
        };

        decoded.map_err(|e| RemoteError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }
}

#[async_trait]
impl RemoteTagClient for HttpTagClient {
    async fn list_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
    ) -> RemoteResult<TagSet> {
        let url = self.url("/tags");
        let response: ListTagsResponse = self
            .execute(identifier, || {
                self.client.get(&url).query(&[("resource", identifier)])
            })
            .await?;

        TagSet::try_from(response.tags).map_err(|e| RemoteError::InvalidResponse {
            message: format!("Invalid tags for {identifier}: {e}"),
        })
    }

    async fn remove_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
        keys: &BTreeSet<String>,
    ) -> RemoteResult<()> {
        let url = self.url("/tags/untag");
        let body = UntagRequest {
            resource: identifier,
            tag_keys: keys,
        };

        let _: Option<serde_json::Value> = self
            .execute(identifier, || self.client.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn add_or_update_tags(
        &self,
        _ctx: &ReconciliationContext,
        identifier: &str,
        tags: &TagSet,
    ) -> RemoteResult<()> {
        let url = self.url("/tags/tag");
        let body = TagRequest {
            resource: identifier,
            tags,
        };

        let _: Option<serde_json::Value> = self
            .execute(identifier, || self.client.post(&url).json(&body))
            .await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ID: &str = "arn:aws:directconnect:us-east-1:123456789012:dxcon/dxcon-abc";

    fn client_for(server: &MockServer) -> HttpTagClient {
        HttpTagClient::new(&server.uri(), Some(String::from("secret")))
            .expect("client")
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_list_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tags"))
            .and(query_param("resource", ID))
            .and(header_eq("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"tags": {"env": "prod"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ReconciliationContext::new();
        let tags = client_for(&server).list_tags(&ctx, ID).await.expect("list");

        assert_eq!(tags, TagSet::from_pairs([("env", "prod")]).expect("valid"));
    }

    #[tokio::test]
    async fn test_remove_tags_sends_keys() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tags/untag"))
            .and(body_json(json!({"resource": ID, "tagKeys": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ReconciliationContext::new();
        let keys = BTreeSet::from([String::from("b"), String::from("a")]);
        client_for(&server)
            .remove_tags(&ctx, ID, &keys)
            .await
            .expect("remove");
    }

    #[tokio::test]
    async fn test_add_tags_sends_map() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tags/tag"))
            .and(body_json(json!({"resource": ID, "tags": {"env": "staging"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ReconciliationContext::new();
        let tags = TagSet::from_pairs([("env", "staging")]).expect("valid");
        client_for(&server)
            .add_or_update_tags(&ctx, ID, &tags)
            .await
            .expect("tag");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tags"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ReconciliationContext::new();
        let tags = client_for(&server).list_tags(&ctx, ID).await.expect("list");
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tags/tag"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"message": "too many tags"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ReconciliationContext::new();
        let tags = TagSet::from_pairs([("env", "prod")]).expect("valid");
        let err = client_for(&server)
            .add_or_update_tags(&ctx, ID, &tags)
            .await
            .unwrap_err();

        match err {
            RemoteError::ApiRequestFailed { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "too many tags");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("resource", "missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("resource", "forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let ctx = ReconciliationContext::new();
        let client = client_for(&server);

        assert!(matches!(
            client.list_tags(&ctx, "missing").await,
            Err(RemoteError::ResourceNotFound { .. })
        ));
        assert!(matches!(
            client.list_tags(&ctx, "forbidden").await,
            Err(RemoteError::AuthenticationFailed { .. })
        ));
    }
}
