use crate::api::models::Track;
use crate::events::PlaybackState;

#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingMetadata {
    pub title: String,
    pub artist: String,
    pub artwork_ref: String,
}

impl From<&Track> for NowPlayingMetadata {
    fn from(track: &Track) -> Self {
        Self {
            title: track.title.clone(),
            artist: track.channel_name.clone(),
            artwork_ref: track.artwork_large(),
        }
    }
}

/// OS media-session surface the session reports to.
pub trait NowPlaying: Send + Sync {
    fn set_metadata(&self, metadata: &NowPlayingMetadata);
    fn set_playback(&self, state: PlaybackState, position: f64, duration: f64);
    fn clear(&self);
}

/// User intents coming back from the media-session surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteIntent {
    Play,
    Pause,
    Next,
    Previous,
    SeekRelative(f64),
    SeekTo(f64),
}

/// Bridge for hosts without a media-session surface: just logs.
#[derive(Debug, Default)]
pub struct LogNowPlaying;

impl NowPlaying for LogNowPlaying {
    fn set_metadata(&self, metadata: &NowPlayingMetadata) {
        log::info!("[now_playing] {} - {}", metadata.artist, metadata.title);
    }

    fn set_playback(&self, state: PlaybackState, position: f64, duration: f64) {
        log::debug!(
            "[now_playing] {:?} {:.1}/{:.1}s",
            state,
            position,
            duration
        );
    }

    fn clear(&self) {
        log::debug!("[now_playing] cleared");
    }
}
