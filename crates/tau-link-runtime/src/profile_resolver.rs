//! Username-to-profile resolution against the Roblox user search API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tau_dispatch::RetryPolicy;

const DEFAULT_LOOKUP_ATTEMPTS: usize = 3;
const DEFAULT_LOOKUP_DELAY: Duration = Duration::from_secs(2);
const SEARCH_PATH: &str = "/v1/users/search";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Candidate profile returned for a human-entered name.
pub struct ResolvedProfile {
    pub profile_id: String,
    /// Username reported by the remote service, which may differ from the query.
    pub profile_name: Option<String>,
    pub profile_url: String,
}

/// Resolves a human-entered name to a candidate profile.
///
/// Every failure degrades to `None`; callers treat that as "not found".
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, username: &str) -> Option<ResolvedProfile>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileResolverConfig {
    pub api_base: String,
    pub profile_url_base: String,
    pub result_limit: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProfileResolverConfig {
    fn default() -> Self {
        Self {
            api_base: "https://users.roblox.com".to_string(),
            profile_url_base: "https://www.roblox.com".to_string(),
            result_limit: 10,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::fixed(DEFAULT_LOOKUP_ATTEMPTS, DEFAULT_LOOKUP_DELAY),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserSearchResponse {
    #[serde(default)]
    data: Option<Vec<UserSearchEntry>>,
}

#[derive(Debug, Deserialize)]
struct UserSearchEntry {
    id: Value,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Clone)]
/// reqwest-backed resolver with fixed-delay retries on transport failures.
pub struct HttpProfileResolver {
    http: reqwest::Client,
    config: ProfileResolverConfig,
}

impl HttpProfileResolver {
    pub fn new(config: ProfileResolverConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("tau-link-bot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout.max(Duration::from_millis(1)))
            .build()
            .context("failed to create profile resolver http client")?;
        Ok(Self {
            http,
            config: ProfileResolverConfig {
                api_base: config.api_base.trim_end_matches('/').to_string(),
                profile_url_base: config.profile_url_base.trim_end_matches('/').to_string(),
                ..config
            },
        })
    }

    pub fn profile_url(&self, profile_id: &str) -> String {
        format!(
            "{}/users/{profile_id}/profile",
            self.config.profile_url_base
        )
    }

    fn search_url(&self, username: &str) -> Result<Url> {
        let limit = self.config.result_limit.max(1).to_string();
        Url::parse_with_params(
            &format!("{}{SEARCH_PATH}", self.config.api_base),
            &[("keyword", username), ("limit", limit.as_str())],
        )
        .with_context(|| format!("invalid profile search url for '{username}'"))
    }

    async fn read_first_candidate(&self, response: reqwest::Response) -> Option<ResolvedProfile> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = %truncate_for_log(&body, 240),
                "profile search returned unexpected status"
            );
            return None;
        }

        let parsed = match response.json::<UserSearchResponse>().await {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(error = %error, "failed to decode profile search response");
                return None;
            }
        };
        // The remote ranking decides ties; the first entry wins.
        let first = parsed.data.and_then(|entries| entries.into_iter().next())?;
        let profile_id = match first.id {
            Value::Number(number) => number.to_string(),
            Value::String(text) if !text.trim().is_empty() => text.trim().to_string(),
            other => {
                tracing::warn!(id = %other, "profile search entry has unusable id");
                return None;
            }
        };
        Some(ResolvedProfile {
            profile_url: self.profile_url(&profile_id),
            profile_id,
            profile_name: first.name,
        })
    }
}

#[async_trait]
impl ProfileResolver for HttpProfileResolver {
    async fn resolve(&self, username: &str) -> Option<ResolvedProfile> {
        let url = match self.search_url(username) {
            Ok(url) => url,
            Err(error) => {
                tracing::warn!(error = %error, "cannot build profile search request");
                return None;
            }
        };

        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            match self.http.get(url.clone()).send().await {
                Ok(response) => return self.read_first_candidate(response).await,
                Err(error) => {
                    let delay = if is_retryable_transport_error(&error) {
                        self.config.retry.delay_after_attempt(attempt)
                    } else {
                        None
                    };
                    let Some(delay) = delay else {
                        tracing::error!(
                            attempts = attempt,
                            error = %error,
                            "profile search failed; treating name as unresolved"
                        );
                        return None;
                    };
                    tracing::warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %error,
                        "profile search attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
