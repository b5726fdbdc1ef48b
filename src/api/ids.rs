use crate::error::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

static MEDIA_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid id pattern"));

static MEDIA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:youtube\.com/(?:watch\?v=|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})")
        .expect("valid url pattern")
});

static LIST_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]list=([A-Za-z0-9_-]+)").expect("valid list pattern"));

static WATCH_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/watch\?v=([A-Za-z0-9_-]{11})").expect("valid watch pattern"));

pub fn is_valid_media_id(id: &str) -> bool {
    MEDIA_ID.is_match(id)
}

pub fn validate_media_id(id: &str) -> AppResult<()> {
    if is_valid_media_id(id) {
        Ok(())
    } else {
        Err(AppError::Validation(id.to_string()))
    }
}

/// What a piece of user input names.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaRef {
    Video(String),
    Playlist {
        playlist_id: String,
        video_id: Option<String>,
    },
}

/// Accepts a bare media id or any of the platform's watch/embed/short URLs.
pub fn parse_media_ref(input: &str) -> Option<MediaRef> {
    let trimmed = input.trim();
    if is_valid_media_id(trimmed) {
        return Some(MediaRef::Video(trimmed.to_string()));
    }

    let video_id = MEDIA_URL
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    if let Some(list) = LIST_PARAM.captures(trimmed).and_then(|c| c.get(1)) {
        return Some(MediaRef::Playlist {
            playlist_id: list.as_str().to_string(),
            video_id,
        });
    }

    video_id.map(MediaRef::Video)
}

/// Media id from a mirror's relative `/watch?v=` link.
pub fn watch_path_id(path: &str) -> Option<String> {
    WATCH_PATH
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
