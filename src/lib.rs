pub mod api;
pub mod audio;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod relay;

use api::client::UpstreamClient;
use api::ids::{validate_media_id, MediaRef};
use api::mirrors::MirrorPool;
use api::models::Track;
use api::profiles::default_profiles;
use api::resolver::{PlayerApi, ResolverSettings, StreamResolver};
use audio::cache::ResolutionCache;
use audio::engine::{EngineEventReceiver, MediaEngine};
use audio::queue::PlaybackQueue;
use audio::session::{PlaybackSession, SessionHandle, SessionParts, SessionSettings};
use bridge::NowPlaying;
use clock::{Clock, SystemClock};
use config::AppConfig;
use error::{AppError, AppResult};
use history::PlayHistory;
use relay::Relay;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Initialise `env_logger` with `ytbg=info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("ytbg=info"))
        .try_init();
}

/// Composition root: everything a session needs, built once from config.
pub struct AppContext {
    pub config: AppConfig,
    pub resolver: Arc<StreamResolver>,
    pub cache: Arc<ResolutionCache>,
    pub relay: Arc<Relay>,
    /// Metadata source for titles and playlists; `None` when mirrors are off.
    pub mirrors: Option<Arc<MirrorPool>>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let upstream = UpstreamClient::new(&config)?;
        let relay = Relay::from_config(upstream.http_client().clone(), &config);
        let mirrors = upstream.mirrors();
        Ok(Self::assemble(
            config,
            Arc::new(upstream),
            Arc::new(relay),
            mirrors,
            Arc::new(SystemClock),
        ))
    }

    /// Build around a caller-supplied upstream and clock.
    pub fn with_api(config: AppConfig, api: Arc<dyn PlayerApi>, clock: Arc<dyn Clock>) -> Self {
        let relay = Relay::from_config(reqwest::Client::new(), &config);
        Self::assemble(config, api, Arc::new(relay), None, clock)
    }

    fn assemble(
        config: AppConfig,
        api: Arc<dyn PlayerApi>,
        relay: Arc<Relay>,
        mirrors: Option<Arc<MirrorPool>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = StreamResolver::new(
            api,
            default_profiles(config.use_mirrors),
            ResolverSettings::from_config(&config),
            Arc::clone(&clock),
        );
        let cache = ResolutionCache::new(
            config.cache_capacity,
            chrono::Duration::seconds(config.cache_safety_margin_secs),
            Arc::clone(&clock),
        );
        log::info!(
            "[app] Ready: {} profiles, cache capacity {}",
            resolver.profiles().len(),
            config.cache_capacity
        );

        Self {
            config,
            resolver: Arc::new(resolver),
            cache: Arc::new(cache),
            relay,
            mirrors,
        }
    }

    /// Turn a parsed media reference into queueable tracks.
    ///
    /// Video metadata is best effort: without a mirror answer the track is
    /// queued under its bare id. A playlist needs a mirror unless the URL
    /// also names a video to start from.
    pub async fn lookup_tracks(&self, media: &MediaRef) -> AppResult<Vec<Track>> {
        match media {
            MediaRef::Video(id) => Ok(vec![self.video_track(id).await?]),
            MediaRef::Playlist {
                playlist_id,
                video_id,
            } => {
                let listed = match &self.mirrors {
                    Some(mirrors) => mirrors.playlist(playlist_id).await,
                    None => Err(AppError::Config("Mirrors are disabled".into())),
                };
                match listed {
                    Ok(playlist) if !playlist.tracks.is_empty() => Ok(playlist.tracks),
                    outcome => match video_id {
                        Some(id) => {
                            log::warn!(
                                "[app] Playlist {} unavailable, playing its video only",
                                playlist_id
                            );
                            Ok(vec![self.video_track(id).await?])
                        }
                        None => match outcome {
                            Ok(_) => Err(AppError::NotFound(format!(
                                "Playlist {} has no playable videos",
                                playlist_id
                            ))),
                            Err(e) => Err(e),
                        },
                    },
                }
            }
        }
    }

    async fn video_track(&self, id: &str) -> AppResult<Track> {
        validate_media_id(id)?;
        let Some(mirrors) = &self.mirrors else {
            return Ok(Track::from_id(id));
        };
        match mirrors.video_info(id).await {
            Ok(track) => Ok(track),
            Err(e) => {
                log::warn!("[app] No metadata for {}: {}", id, e);
                Ok(Track::from_id(id))
            }
        }
    }

    /// Spawn a playback session actor on the current runtime.
    pub fn start_session(
        &self,
        engine: Box<dyn MediaEngine>,
        engine_events: EngineEventReceiver,
        history: Arc<dyn PlayHistory>,
        now_playing: Arc<dyn NowPlaying>,
    ) -> (SessionHandle, JoinHandle<()>) {
        PlaybackSession::spawn(
            SessionSettings::from_config(&self.config),
            PlaybackQueue::new(),
            SessionParts {
                resolver: Arc::clone(&self.resolver),
                cache: Arc::clone(&self.cache),
                engine,
                engine_events,
                history,
                now_playing,
            },
        )
    }
}
