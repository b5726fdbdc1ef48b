use crate::api::ids::validate_media_id;
use crate::api::models::{AudioCandidate, PlayerResponse, StreamDescriptor};
use crate::api::profiles::ClientProfile;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// The upstream seam: one profile-shaped request for one media id.
pub trait PlayerApi: Send + Sync {
    fn fetch_player<'a>(
        &'a self,
        profile: &'a ClientProfile,
        video_id: &'a str,
    ) -> BoxFuture<'a, AppResult<PlayerResponse>>;
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub target_bitrate_bps: u64,
    pub preferred_codecs: Vec<String>,
    pub default_expiry: chrono::Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ResolverSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            target_bitrate_bps: config.target_bitrate_bps,
            preferred_codecs: config.preferred_codecs.clone(),
            default_expiry: chrono::Duration::seconds(config.default_expiry_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    Other,
    RateLimited,
    NotFound,
}

#[derive(Debug, Clone)]
struct ProfileFailure {
    reason: String,
    class: FailureClass,
}

impl ProfileFailure {
    fn from_error(profile: &ClientProfile, error: &AppError) -> Self {
        let class = match error {
            AppError::RateLimited(_) => FailureClass::RateLimited,
            AppError::NotFound(_) => FailureClass::NotFound,
            _ => FailureClass::Other,
        };
        let reason = match error {
            AppError::Http(e) if e.is_timeout() => format!("{}: request timed out", profile.name),
            AppError::Http(_) | AppError::Json(_) => format!("{}: request error", profile.name),
            other => format!("{}: {}", profile.name, other),
        };
        Self { reason, class }
    }

    fn unplayable(profile: &ClientProfile, response: &PlayerResponse) -> Self {
        let status = response.status();
        let reason = response
            .playability_status
            .as_ref()
            .and_then(|s| s.reason.clone())
            .filter(|r| !r.is_empty())
            .or_else(|| (!status.is_empty()).then(|| status.to_string()))
            .unwrap_or_else(|| format!("{} failed", profile.name));
        Self {
            class: classify_playability(status, &reason),
            reason,
        }
    }
}

fn classify_playability(status: &str, reason: &str) -> FailureClass {
    let reason = reason.to_lowercase();
    if reason.contains("not a bot") || reason.contains("unusual traffic") {
        FailureClass::RateLimited
    } else if status == "ERROR"
        && (reason.contains("unavailable") || reason.contains("does not exist"))
    {
        FailureClass::NotFound
    } else {
        FailureClass::Other
    }
}

/// Maps codec tags onto families so `aac`, `aaclc` and `mp4a.40.2` compare equal.
pub fn codec_family(codec: &str) -> String {
    match codec.to_lowercase().as_str() {
        "aac" | "aaclc" | "aac-lc" | "mp4a" | "mp4a.40.2" => "aac-lc".to_string(),
        "heaacv1" | "he-aac" | "mp4a.40.5" => "he-aac".to_string(),
        other => other.to_string(),
    }
}

/// Pick the candidate to play.
///
/// Among candidates of a preferred codec family, take the bitrate closest to
/// `target_bps` (first wins on ties). With no preferred candidate, take the
/// highest bitrate of any codec.
pub fn select_candidate<'a>(
    candidates: &'a [AudioCandidate],
    target_bps: u64,
    preferred_codecs: &[String],
) -> Option<&'a AudioCandidate> {
    let families: Vec<String> = preferred_codecs.iter().map(|c| codec_family(c)).collect();

    let preferred = candidates
        .iter()
        .filter(|c| families.contains(&codec_family(&c.codec)))
        .min_by_key(|c| c.bitrate_bps.abs_diff(target_bps));

    preferred.or_else(|| {
        candidates
            .iter()
            .reduce(|best, c| if c.bitrate_bps > best.bitrate_bps { c } else { best })
    })
}

/// Resolves a media id to a playable audio stream by probing client
/// profiles in priority order. Does not cache.
pub struct StreamResolver {
    api: Arc<dyn PlayerApi>,
    profiles: Vec<ClientProfile>,
    settings: ResolverSettings,
    clock: Arc<dyn Clock>,
}

impl StreamResolver {
    pub fn new(
        api: Arc<dyn PlayerApi>,
        profiles: Vec<ClientProfile>,
        settings: ResolverSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            profiles,
            settings,
            clock,
        }
    }

    pub fn profiles(&self) -> &[ClientProfile] {
        &self.profiles
    }

    pub async fn resolve(&self, video_id: &str) -> AppResult<StreamDescriptor> {
        validate_media_id(video_id)?;

        let mut failures: Vec<ProfileFailure> = Vec::new();

        for profile in &self.profiles {
            log::debug!("[resolver] Trying {} for {}", profile.name, video_id);
            let failure = match self.api.fetch_player(profile, video_id).await {
                Ok(response) => match self.evaluate(profile, &response) {
                    Ok(descriptor) => {
                        log::info!(
                            "[resolver] {} resolved via {}: {} @ {}bps",
                            video_id,
                            profile.name,
                            descriptor.codec_tag,
                            descriptor.bitrate_bps
                        );
                        return Ok(descriptor);
                    }
                    Err(failure) => failure,
                },
                Err(e) => ProfileFailure::from_error(profile, &e),
            };
            log::info!("[resolver] {} failed for {}: {}", profile.name, video_id, failure.reason);
            failures.push(failure);
        }

        Err(Self::aggregate(failures))
    }

    fn evaluate(
        &self,
        profile: &ClientProfile,
        response: &PlayerResponse,
    ) -> Result<StreamDescriptor, ProfileFailure> {
        if response.status() != "OK" || !response.has_formats() {
            return Err(ProfileFailure::unplayable(profile, response));
        }

        let candidates = response.audio_candidates();
        let chosen = select_candidate(
            &candidates,
            self.settings.target_bitrate_bps,
            &self.settings.preferred_codecs,
        )
        .ok_or_else(|| ProfileFailure {
            reason: format!("{}: no audio formats", profile.name),
            class: FailureClass::Other,
        })?;

        let duration_seconds = chosen
            .approx_duration_secs
            .or_else(|| response.length_seconds())
            .unwrap_or(0);

        let expires_in = response
            .expires_in_seconds()
            .filter(|s| *s > 0)
            .map(chrono::Duration::seconds)
            .unwrap_or(self.settings.default_expiry);

        let details = response.video_details.as_ref();
        Ok(StreamDescriptor {
            stream_url: chosen.url.clone(),
            mime_type: chosen.mime_type.clone(),
            codec_tag: chosen.codec.clone(),
            bitrate_bps: chosen.bitrate_bps,
            duration_seconds,
            expires_at: self.clock.now() + expires_in,
            title: details
                .and_then(|d| d.title.clone())
                .unwrap_or_else(|| "Unknown".into()),
            author: details
                .and_then(|d| d.author.clone())
                .unwrap_or_else(|| "Unknown".into()),
            profile: profile.name.to_string(),
        })
    }

    fn aggregate(failures: Vec<ProfileFailure>) -> AppError {
        if let Some(f) = failures.iter().find(|f| f.class == FailureClass::NotFound) {
            return AppError::NotFound(f.reason.clone());
        }
        if let Some(f) = failures
            .iter()
            .rev()
            .find(|f| f.class == FailureClass::RateLimited)
        {
            return AppError::RateLimited(f.reason.clone());
        }
        AppError::ResolutionExhausted {
            last_reason: failures
                .last()
                .map(|f| f.reason.clone())
                .unwrap_or_else(|| "No clients succeeded".into()),
        }
    }
}
