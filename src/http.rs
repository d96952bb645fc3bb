//! Shared HTTP plumbing for the model and vector-store clients.
//!
//! # Retry Strategy
//!
//! Every outbound call goes through [`send_with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use std::time::Duration;

/// Build a client with the given overall request timeout.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request, retrying transient failures.
///
/// `make_request` is called once per attempt because a `RequestBuilder`
/// is consumed by `send`. `service` names the upstream in error messages
/// (e.g. `"Ollama"`, `"Qdrant"`).
///
/// Returns the first successful response. Non-retryable statuses fail with
/// the status and response body in the error message.
pub async fn send_with_retry<F>(
    service: &str,
    max_retries: u32,
    mut make_request: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match make_request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        service,
                        status,
                        body_text
                    ));
                    continue;
                }

                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error: {}", service, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", service)))
}

/// How a request authenticates against an upstream.
#[derive(Clone)]
pub enum ApiAuth {
    None,
    /// `Authorization: Bearer <key>` (OpenAI).
    Bearer(String),
    /// `api-key: <key>` (Azure OpenAI, Azure AI Search, Qdrant Cloud).
    ApiKey(String),
}

impl ApiAuth {
    /// Pick the header style for an OpenAI-compatible provider.
    pub fn for_provider(provider: &str, key: Option<String>) -> Self {
        match (provider, key) {
            (_, None) => ApiAuth::None,
            ("azure_openai", Some(k)) => ApiAuth::ApiKey(k),
            (_, Some(k)) => ApiAuth::Bearer(k),
        }
    }

    pub fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            ApiAuth::None => req,
            ApiAuth::Bearer(k) => req.header("Authorization", format!("Bearer {}", k)),
            ApiAuth::ApiKey(k) => req.header("api-key", k),
        }
    }
}

impl std::fmt::Debug for ApiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuth::None => write!(f, "None"),
            ApiAuth::Bearer(_) => write!(f, "Bearer(***)"),
            ApiAuth::ApiKey(_) => write!(f, "ApiKey(***)"),
        }
    }
}

/// Default Azure OpenAI data-plane API version.
pub const AZURE_OPENAI_API_VERSION: &str = "2024-06-01";

/// Build the URL of an OpenAI-compatible operation (`embeddings`,
/// `chat/completions`, `models`).
///
/// Azure OpenAI addresses a deployment rather than a model:
/// `{endpoint}/openai/deployments/{deployment}/{path}?api-version=...`.
pub fn openai_url(
    provider: &str,
    endpoint: &str,
    model: &str,
    api_version: Option<&str>,
    path: &str,
) -> String {
    if provider == "azure_openai" {
        let version = api_version.unwrap_or(AZURE_OPENAI_API_VERSION);
        if path == "models" {
            return format!("{}/openai/models?api-version={}", endpoint, version);
        }
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            endpoint, model, path, version
        )
    } else {
        format!("{}/{}", endpoint, path)
    }
}

/// GET `url` once with a short timeout and report whether it answered 2xx.
pub async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client
        .get(url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_url_plain() {
        assert_eq!(
            openai_url("openai", "https://api.openai.com/v1", "gpt-4o", None, "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_openai_url_azure_deployment() {
        assert_eq!(
            openai_url(
                "azure_openai",
                "https://res.openai.azure.com",
                "gpt4o-deploy",
                Some("2024-02-01"),
                "embeddings"
            ),
            "https://res.openai.azure.com/openai/deployments/gpt4o-deploy/embeddings?api-version=2024-02-01"
        );
    }

    #[test]
    fn test_auth_style_by_provider() {
        assert!(matches!(
            ApiAuth::for_provider("azure_openai", Some("k".into())),
            ApiAuth::ApiKey(_)
        ));
        assert!(matches!(
            ApiAuth::for_provider("openai", Some("k".into())),
            ApiAuth::Bearer(_)
        ));
        assert!(matches!(ApiAuth::for_provider("ollama", None), ApiAuth::None));
    }

    #[test]
    fn test_auth_debug_hides_key() {
        let s = format!("{:?}", ApiAuth::Bearer("sk-secret".into()));
        assert!(!s.contains("sk-secret"));
    }
}
