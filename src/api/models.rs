use crate::api::ids::watch_path_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail_ref: String,
    /// Zero when unknown; filled in once a stream is resolved.
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub channel_name: String,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            thumbnail_ref: thumbnail_url(&id),
            id,
            title: title.into(),
            duration_seconds: 0,
            channel_name: "Unknown".to_string(),
        }
    }

    /// Track known only by its media id, as when queued straight from a URL.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let title = id.clone();
        Self::new(id, title)
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel_name = channel.into();
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    /// Larger artwork variant used by the now-playing bridge.
    pub fn artwork_large(&self) -> String {
        self.thumbnail_ref.replace("mqdefault", "hqdefault")
    }
}

pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{}/mqdefault.jpg", video_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub stream_url: String,
    pub mime_type: String,
    pub codec_tag: String,
    pub bitrate_bps: u64,
    pub duration_seconds: u64,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    /// Name of the client profile that produced this stream.
    #[serde(default)]
    pub profile: String,
}

/// One audio-only format offered by the upstream, normalized across
/// player responses and mirror responses.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioCandidate {
    pub url: String,
    pub mime_type: String,
    pub codec: String,
    pub bitrate_bps: u64,
    pub approx_duration_secs: Option<u64>,
}

impl AudioCandidate {
    pub fn from_format(format: &RawFormat) -> Option<Self> {
        let url = format.url.as_ref().filter(|u| !u.is_empty())?;
        if !format.mime_type.starts_with("audio/") {
            return None;
        }
        let approx_duration_secs = format
            .approx_duration_ms
            .as_deref()
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(|ms| (ms + 500) / 1000);
        Some(Self {
            url: url.clone(),
            mime_type: format.mime_type.clone(),
            codec: codec_from_mime(&format.mime_type),
            bitrate_bps: format.bitrate,
            approx_duration_secs,
        })
    }
}

/// Extracts the codec tag from a mime string such as
/// `audio/mp4; codecs="mp4a.40.2"`. Falls back to the mime subtype.
pub fn codec_from_mime(mime: &str) -> String {
    if let Some(idx) = mime.find("codecs=") {
        let rest = &mime[idx + "codecs=".len()..];
        let codec = rest
            .trim_matches(|c| c == '"' || c == '\'' || c == ' ')
            .split([',', '"'])
            .next()
            .unwrap_or_default()
            .trim();
        if !codec.is_empty() {
            return codec.to_string();
        }
    }
    mime.split(';')
        .next()
        .and_then(|m| m.split('/').nth(1))
        .unwrap_or_default()
        .trim()
        .to_string()
}

// Player endpoint wire types

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    #[serde(default)]
    pub playability_status: Option<PlayabilityStatus>,
    #[serde(default)]
    pub streaming_data: Option<StreamingData>,
    #[serde(default)]
    pub video_details: Option<VideoDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    #[serde(default)]
    pub adaptive_formats: Vec<RawFormat>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
    #[serde(default)]
    pub expires_in_seconds: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFormat {
    #[serde(default)]
    pub itag: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub bitrate: u64,
    #[serde(default)]
    pub content_length: Option<String>,
    #[serde(default)]
    pub approx_duration_ms: Option<String>,
    #[serde(default)]
    pub audio_quality: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub length_seconds: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl PlayerResponse {
    pub fn status(&self) -> &str {
        self.playability_status
            .as_ref()
            .map(|s| s.status.as_str())
            .unwrap_or_default()
    }

    pub fn has_formats(&self) -> bool {
        self.streaming_data
            .as_ref()
            .map(|d| !d.adaptive_formats.is_empty() || !d.formats.is_empty())
            .unwrap_or(false)
    }

    pub fn length_seconds(&self) -> Option<u64> {
        self.video_details
            .as_ref()
            .and_then(|d| d.length_seconds.as_deref())
            .and_then(|s| s.parse().ok())
    }

    pub fn expires_in_seconds(&self) -> Option<i64> {
        self.streaming_data
            .as_ref()
            .and_then(|d| d.expires_in_seconds.as_deref())
            .and_then(|s| s.parse().ok())
    }

    /// Audio-only candidates from the adaptive and combined lists,
    /// de-duplicated by URL, in upstream order.
    pub fn audio_candidates(&self) -> Vec<AudioCandidate> {
        let Some(data) = self.streaming_data.as_ref() else {
            return Vec::new();
        };
        let mut candidates: Vec<AudioCandidate> = Vec::new();
        for format in data.adaptive_formats.iter().chain(data.formats.iter()) {
            if let Some(candidate) = AudioCandidate::from_format(format) {
                if !candidates.iter().any(|c| c.url == candidate.url) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }
}

// Mirror (Piped API) wire types

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorStreamsResponse {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uploader: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub audio_streams: Vec<MirrorAudioStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorAudioStream {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub bitrate: u64,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorPlaylistResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub related_streams: Vec<MirrorPlaylistItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorPlaylistItem {
    /// Relative watch path, e.g. `/watch?v=dQw4w9WgXcQ`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub uploader_name: Option<String>,
}

/// A playlist expanded into playable tracks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub title: String,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorInstance {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
}

impl MirrorStreamsResponse {
    pub fn to_track(&self, video_id: &str) -> Track {
        let mut track = Track::new(video_id, &self.title).with_duration(self.duration);
        if !self.uploader.is_empty() {
            track = track.with_channel(&self.uploader);
        }
        if !self.thumbnail_url.is_empty() {
            track.thumbnail_ref = self.thumbnail_url.clone();
        }
        track
    }
}

impl MirrorPlaylistItem {
    /// `None` when the item does not link to a single video.
    pub fn to_track(&self) -> Option<Track> {
        let id = watch_path_id(&self.url)?;
        let mut track = Track::new(id, &self.title).with_duration(self.duration);
        if let Some(uploader) = self.uploader_name.as_deref().filter(|u| !u.is_empty()) {
            track = track.with_channel(uploader);
        }
        if !self.thumbnail.is_empty() {
            track.thumbnail_ref = self.thumbnail.clone();
        }
        Some(track)
    }
}

impl From<MirrorPlaylistResponse> for Playlist {
    fn from(response: MirrorPlaylistResponse) -> Self {
        Self {
            tracks: response
                .related_streams
                .iter()
                .filter_map(MirrorPlaylistItem::to_track)
                .collect(),
            title: response.name,
        }
    }
}

impl From<MirrorStreamsResponse> for PlayerResponse {
    /// Mirrors only answer for playable items, so a response with streams
    /// maps onto an `OK` player response.
    fn from(mirror: MirrorStreamsResponse) -> Self {
        let adaptive_formats: Vec<RawFormat> = mirror
            .audio_streams
            .into_iter()
            .map(|s| {
                let mime_type = match s.codec.as_deref().filter(|c| !c.is_empty()) {
                    Some(codec) if !s.mime_type.contains("codecs=") => {
                        format!("{}; codecs=\"{}\"", s.mime_type, codec)
                    }
                    _ => s.mime_type,
                };
                RawFormat {
                    itag: None,
                    url: Some(s.url),
                    mime_type,
                    bitrate: s.bitrate,
                    content_length: None,
                    approx_duration_ms: None,
                    audio_quality: s.quality,
                }
            })
            .collect();

        let status = if adaptive_formats.is_empty() {
            PlayabilityStatus {
                status: "UNPLAYABLE".into(),
                reason: Some("No audio streams available".into()),
            }
        } else {
            PlayabilityStatus {
                status: "OK".into(),
                reason: None,
            }
        };

        PlayerResponse {
            playability_status: Some(status),
            streaming_data: Some(StreamingData {
                adaptive_formats,
                formats: Vec::new(),
                expires_in_seconds: None,
            }),
            video_details: Some(VideoDetails {
                video_id: None,
                title: Some(mirror.title),
                length_seconds: Some(mirror.duration.to_string()),
                author: Some(mirror.uploader),
            }),
        }
    }
}
