use crate::api::ids::validate_media_id;
use crate::api::models::{
    MirrorInstance, MirrorPlaylistResponse, MirrorStreamsResponse, PlayerResponse, Playlist, Track,
};
use crate::api::profiles::DESKTOP_USER_AGENT;
use crate::error::{AppError, AppResult};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

const INDEX_TIMEOUT: Duration = Duration::from_secs(5);

struct MirrorState {
    instances: Vec<String>,
    last_refreshed: Option<Instant>,
}

/// Pool of public mirror API instances, tried in order.
///
/// The instance list is refreshed from a public index at most once per
/// `refresh_interval`. A failed refresh keeps the current list.
pub struct MirrorPool {
    http: reqwest::Client,
    index_url: String,
    refresh_interval: Duration,
    timeout: Duration,
    state: RwLock<MirrorState>,
}

impl MirrorPool {
    pub fn new(
        http: reqwest::Client,
        instances: Vec<String>,
        index_url: String,
        refresh_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            index_url,
            refresh_interval,
            timeout,
            state: RwLock::new(MirrorState {
                instances,
                last_refreshed: None,
            }),
        }
    }

    pub async fn instances(&self) -> Vec<String> {
        self.state.read().await.instances.clone()
    }

    async fn refresh_if_stale(&self) {
        {
            let state = self.state.read().await;
            if let Some(at) = state.last_refreshed {
                if at.elapsed() < self.refresh_interval {
                    return;
                }
            }
        }

        if self.index_url.is_empty() {
            return;
        }

        match self.fetch_index().await {
            Ok(urls) if !urls.is_empty() => {
                log::info!("[mirrors] Refreshed instance list: {} instances", urls.len());
                let mut state = self.state.write().await;
                state.instances = urls;
                state.last_refreshed = Some(Instant::now());
            }
            Ok(_) => {
                log::debug!("[mirrors] Instance index returned no usable instances");
            }
            Err(e) => {
                log::debug!("[mirrors] Instance index refresh failed: {}", e);
            }
        }
    }

    async fn fetch_index(&self) -> AppResult<Vec<String>> {
        let response = self
            .http
            .get(&self.index_url)
            .timeout(INDEX_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Upstream {
                status: response.status().as_u16(),
                message: "instance index".into(),
            });
        }
        let instances: Vec<MirrorInstance> = response.json().await?;
        Ok(instances
            .into_iter()
            .filter_map(|i| i.api_url)
            .filter(|u| u.starts_with("https://"))
            .map(|u| u.trim_end_matches('/').to_string())
            .collect())
    }

    /// Ask each instance in turn for the stream listing of `video_id`.
    pub async fn streams(&self, video_id: &str, user_agent: &str) -> AppResult<PlayerResponse> {
        let body: MirrorStreamsResponse = self
            .first_answer(&format!("/streams/{}", video_id), user_agent)
            .await?;
        Ok(body.into())
    }

    /// Title, channel and duration of a single video.
    pub async fn video_info(&self, video_id: &str) -> AppResult<Track> {
        validate_media_id(video_id)?;
        let body: MirrorStreamsResponse = self
            .first_answer(&format!("/streams/{}", video_id), DESKTOP_USER_AGENT)
            .await?;
        Ok(body.to_track(video_id))
    }

    /// Expand a playlist into tracks. Items that are not single videos are skipped.
    pub async fn playlist(&self, playlist_id: &str) -> AppResult<Playlist> {
        if playlist_id.is_empty()
            || !playlist_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::Validation(playlist_id.to_string()));
        }
        let body: MirrorPlaylistResponse = self
            .first_answer(&format!("/playlists/{}", playlist_id), DESKTOP_USER_AGENT)
            .await?;
        let playlist = Playlist::from(body);
        log::info!(
            "[mirrors] Playlist {} \"{}\": {} tracks",
            playlist_id,
            playlist.title,
            playlist.tracks.len()
        );
        Ok(playlist)
    }

    async fn first_answer<T: DeserializeOwned>(&self, path: &str, user_agent: &str) -> AppResult<T> {
        self.refresh_if_stale().await;

        let instances = self.instances().await;
        let mut last_error = AppError::Upstream {
            status: 0,
            message: "No mirror instances configured".into(),
        };

        for instance in &instances {
            let url = format!("{}{}", instance, path);
            match self.fetch_json(&url, user_agent).await {
                Ok(body) => {
                    log::debug!("[mirrors] {} answered {}", instance, path);
                    return Ok(body);
                }
                Err(e) => {
                    log::debug!("[mirrors] {} failed {}: {}", instance, path, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str, user_agent: &str) -> AppResult<T> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited(format!("mirror HTTP {}", status.as_u16())));
        }
        // A mirror's 404 is not authoritative about the item itself.
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        Ok(response.json().await?)
    }
}
