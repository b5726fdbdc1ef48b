use crate::api::models::Track;
use crate::audio::queue::QueueState;
use serde::Serialize;

/// Published state of a playback session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Loading,
    Playing,
    Paused,
    Error(String),
}

impl SessionState {
    pub fn is_error(&self) -> bool {
        matches!(self, SessionState::Error(_))
    }
}

/// Coarse playback state for OS-level now-playing surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    None,
}

impl From<&SessionState> for PlaybackState {
    fn from(state: &SessionState) -> Self {
        match state {
            SessionState::Playing => PlaybackState::Playing,
            SessionState::Paused | SessionState::Loading | SessionState::Error(_) => {
                PlaybackState::Paused
            }
            SessionState::Idle => PlaybackState::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub current_track: Option<Track>,
    pub queue: QueueState,
    pub position: f64,
    pub duration: f64,
    pub volume: f32,
    pub muted: bool,
    pub consecutive_failures: u32,
    pub load_generation: u64,
}

impl SessionSnapshot {
    pub fn current_id(&self) -> Option<&str> {
        self.current_track.as_ref().map(|t| t.id.as_str())
    }
}
