use crate::api::profiles::ANDROID_VR_USER_AGENT;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use reqwest::header::{
    HeaderMap, HeaderName, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE, USER_AGENT,
};
use std::time::Duration;
use url::Url;

/// Headers copied verbatim from the media host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayHeaders {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub accept_ranges: Option<String>,
}

impl RelayHeaders {
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            content_type: text(CONTENT_TYPE),
            content_length: text(CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            content_range: text(CONTENT_RANGE),
            accept_ranges: text(ACCEPT_RANGES),
        }
    }
}

#[derive(Debug)]
pub struct RelayResponse {
    /// 200 or 206.
    pub status: u16,
    pub headers: RelayHeaders,
    body: reqwest::Response,
}

impl RelayResponse {
    /// The upstream body, for streaming with `bytes_stream` or `chunk`.
    pub fn into_body(self) -> reqwest::Response {
        self.body
    }
}

/// Fetches media bytes on behalf of a player, restricted to allow-listed hosts.
pub struct Relay {
    http: reqwest::Client,
    allowed_hosts: Vec<String>,
    timeout: Duration,
}

impl Relay {
    pub fn new(http: reqwest::Client, allowed_hosts: Vec<String>, timeout: Duration) -> Self {
        Self {
            http,
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            timeout,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &AppConfig) -> Self {
        Self::new(
            http,
            config.relay_allowed_hosts.clone(),
            config.relay_timeout(),
        )
    }

    /// Exact host match or any subdomain of an allowed host.
    pub fn is_allowed_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    pub fn check_target(&self, target: &str) -> AppResult<Url> {
        let url = Url::parse(target)
            .map_err(|e| AppError::Validation(format!("Invalid relay URL: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported relay scheme: {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| AppError::Validation("Relay URL has no host".to_string()))?;
        if !self.is_allowed_host(host) {
            return Err(AppError::Validation(format!("Host not allowed: {}", host)));
        }

        Ok(url)
    }

    /// GET `target`, forwarding `range` when given.
    pub async fn fetch(&self, target: &str, range: Option<&str>) -> AppResult<RelayResponse> {
        let url = self.check_target(target)?;
        log::debug!(
            "[relay] GET {}... range={:?}",
            target.chars().take(80).collect::<String>(),
            range
        );

        let mut request = self
            .http
            .get(url)
            .header(USER_AGENT, ANDROID_VR_USER_AGENT)
            .timeout(self.timeout);
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("[relay] Upstream returned {}", status);
            return Err(AppError::Relay {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        Ok(RelayResponse {
            status: status.as_u16(),
            headers: RelayHeaders::from_headers(response.headers()),
            body: response,
        })
    }
}
