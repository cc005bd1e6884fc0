//! Stateless HTTP fallback.
//!
//! Runs the same `execute(command, body, timeout)` contract against a web
//! API that accepts the command envelope as a JSON POST body. Every call is
//! independent; the API token travels as a bearer credential on each request.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{TokenPlacement, PROTOCOL_VERSION};
use crate::discovery::{Catalogue, CommandCheck};
use crate::envelope::{self, body_map, CommandOutcome, Envelope};
use crate::error::{RconError, Result};

/// Longest response body kept in an [`RconError::Http`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Clone)]
pub struct HttpFallbackConfig {
    pub base_url: String,
    pub token: String,
    pub execute_path: String,
    /// Documentation endpoint, tried under `api/` and at the root.
    pub docs_endpoint: String,
    pub user_agent: String,
    pub protocol_version: i64,
}

impl HttpFallbackConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            execute_path: "/api/commands/execute".to_string(),
            docs_endpoint: "get_api_documentation".to_string(),
            user_agent: concat!("rconlink/", env!("CARGO_PKG_VERSION")).to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    fn execute_url(&self) -> String {
        format!("{}/{}", self.base(), self.execute_path.trim_start_matches('/'))
    }

    /// `base/api/<endpoint>` then `base/<endpoint>`.
    fn candidate_urls(&self, endpoint: &str) -> Vec<String> {
        let endpoint = endpoint.trim_matches('/');
        let mut urls = Vec::with_capacity(2);
        for path in [format!("api/{endpoint}"), endpoint.to_string()] {
            let url = format!("{}/{path}", self.base());
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }
}

impl fmt::Debug for HttpFallbackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFallbackConfig")
            .field("base_url", &self.base_url)
            .field("token", &format_args!("<redacted:{} bytes>", self.token.len()))
            .field("execute_path", &self.execute_path)
            .field("docs_endpoint", &self.docs_endpoint)
            .finish()
    }
}

#[derive(Debug)]
pub struct HttpFallback {
    client: reqwest::Client,
    config: HttpFallbackConfig,
    catalogue: OnceCell<Option<Arc<Catalogue>>>,
}

impl HttpFallback {
    pub fn new(config: HttpFallbackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(network_error)?;
        Ok(Self {
            client,
            config,
            catalogue: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &HttpFallbackConfig {
        &self.config
    }

    /// POST the envelope and map the reply.
    ///
    /// Non-2xx statuses and network failures are [`RconError::Http`]; a 2xx
    /// body that matches no known response shape is a protocol error.
    pub async fn execute(
        &self,
        command: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<CommandOutcome> {
        let body = body_map(body)?;
        let envelope = Envelope::build(
            command,
            self.config.protocol_version,
            body,
            None,
            &TokenPlacement::default(),
        );
        let url = self.config.execute_url();
        debug!(command, url = %url, "http execute");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .timeout(timeout)
            .json(&envelope.to_value())
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let text = response.text().await.map_err(network_error)?;
        if !status.is_success() {
            warn!(command, status = status.as_u16(), "http execute failed");
            return Err(RconError::Http {
                status: Some(status.as_u16()),
                body: truncate(text),
            });
        }

        let reply = envelope::parse(text.as_bytes(), None).inspect_err(|err| {
            warn!(command, error = %err, raw = %text, "unexpected http response shape");
        })?;
        Ok(reply.status.into())
    }

    /// Supported endpoints, fetched once from the documentation endpoint.
    pub async fn catalogue(&self, timeout: Duration) -> Option<Arc<Catalogue>> {
        self.catalogue
            .get_or_init(|| async {
                let catalogue = self.fetch_catalogue(timeout).await.map(Arc::new);
                match &catalogue {
                    Some(catalogue) => info!(commands = catalogue.len(), "http catalogue loaded"),
                    None => warn!(base = %self.config.base_url, "http discovery unavailable"),
                }
                catalogue
            })
            .await
            .clone()
    }

    async fn fetch_catalogue(&self, timeout: Duration) -> Option<Catalogue> {
        let urls = self.config.candidate_urls(&self.config.docs_endpoint);
        'schemes: for scheme in ["Bearer", "Token"] {
            for url in &urls {
                let response = self
                    .client
                    .get(url)
                    .header(AUTHORIZATION, format!("{scheme} {}", self.config.token))
                    .timeout(timeout)
                    .send()
                    .await;
                let response = match response {
                    Ok(response) => response,
                    Err(err) => {
                        debug!(url = %url, error = %err, "documentation request failed");
                        continue;
                    }
                };
                match response.status() {
                    StatusCode::UNAUTHORIZED => {
                        debug!(scheme, "documentation endpoint refused auth scheme");
                        continue 'schemes;
                    }
                    StatusCode::NOT_FOUND => continue,
                    status if !status.is_success() => {
                        debug!(url = %url, status = status.as_u16(), "documentation endpoint failed");
                        continue;
                    }
                    _ => {}
                }
                match response.json::<Value>().await {
                    Ok(value) => {
                        if let Some(catalogue) = Catalogue::from_value(&value) {
                            return Some(catalogue);
                        }
                    }
                    Err(err) => debug!(url = %url, error = %err, "documentation is not JSON"),
                }
            }
        }
        None
    }

    pub async fn check_command(&self, command: &str, timeout: Duration) -> CommandCheck {
        match self.catalogue(timeout).await {
            Some(catalogue) => catalogue.check(command),
            None => CommandCheck::Unverified,
        }
    }
}

fn network_error(err: reqwest::Error) -> RconError {
    RconError::Http {
        status: err.status().map(|status| status.as_u16()),
        body: err.to_string(),
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_urls_try_api_prefix_first() {
        let config = HttpFallbackConfig::new("https://crcon.example/", "t");
        assert_eq!(
            config.candidate_urls("/get_api_documentation/"),
            vec![
                "https://crcon.example/api/get_api_documentation".to_string(),
                "https://crcon.example/get_api_documentation".to_string(),
            ]
        );
        assert_eq!(
            config.execute_url(),
            "https://crcon.example/api/commands/execute"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let config = HttpFallbackConfig::new("https://crcon.example", "abcdef");
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted:6 bytes>"));
        assert!(!debug.contains("abcdef"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "é".repeat(400);
        let cut = truncate(text);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
