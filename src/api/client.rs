use crate::api::mirrors::MirrorPool;
use crate::api::models::PlayerResponse;
use crate::api::profiles::{ClientProfile, ProfileTransport};
use crate::api::resolver::PlayerApi;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;

/// HTTP client for the platform's player endpoint and the mirror pool.
pub struct UpstreamClient {
    http: reqwest::Client,
    player_url: String,
    timeout: Duration,
    mirrors: Option<Arc<MirrorPool>>,
}

impl UpstreamClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;

        let mirrors = config.use_mirrors.then(|| {
            Arc::new(MirrorPool::new(
                http.clone(),
                config.mirror_instances.clone(),
                config.mirror_index_url.clone(),
                Duration::from_secs(config.mirror_refresh_secs),
                config.mirror_timeout(),
            ))
        });

        Ok(Self {
            http,
            player_url: config.player_url.clone(),
            timeout: config.request_timeout(),
            mirrors,
        })
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Shared with the metadata lookups; `None` when mirrors are disabled.
    pub fn mirrors(&self) -> Option<Arc<MirrorPool>> {
        self.mirrors.clone()
    }

    fn profile_headers(profile: &ClientProfile) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(profile.user_agent)
                .map_err(|e| AppError::Config(e.to_string()))?,
        );
        Ok(headers)
    }

    /// POST a player request shaped by `profile`, bounded by the request timeout.
    pub async fn player(&self, profile: &ClientProfile, video_id: &str) -> AppResult<PlayerResponse> {
        let headers = Self::profile_headers(profile)?;
        let body = profile.player_body(video_id);

        let response = self
            .http
            .post(&self.player_url)
            .headers(headers)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        let response = self.check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn check_response(&self, response: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(AppError::RateLimited(format!("HTTP {}", status.as_u16())))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            Err(AppError::Upstream {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            })
        }
    }
}

impl PlayerApi for UpstreamClient {
    fn fetch_player<'a>(
        &'a self,
        profile: &'a ClientProfile,
        video_id: &'a str,
    ) -> BoxFuture<'a, AppResult<PlayerResponse>> {
        Box::pin(async move {
            match profile.transport {
                ProfileTransport::Player => self.player(profile, video_id).await,
                ProfileTransport::Mirror => match &self.mirrors {
                    Some(pool) => pool.streams(video_id, profile.user_agent).await,
                    None => Err(AppError::Config("Mirrors are disabled".into())),
                },
            }
        })
    }
}
