use serde_json::{json, Value};

/// User agent of the VR client; also used by the byte relay since stream
/// URLs minted for that client are checked against it.
pub const ANDROID_VR_USER_AGENT: &str = "com.google.android.apps.youtube.vr.oculus/1.71.26 (Linux; U; Android 12L; eureka-user Build/SQ3A.220605.009.A1) gzip";

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileTransport {
    /// POST to the platform's player endpoint.
    Player,
    /// GET `/streams/{id}` against the public mirror pool.
    Mirror,
}

/// A statically configured request signature used to probe the upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientProfile {
    pub name: &'static str,
    pub transport: ProfileTransport,
    pub user_agent: &'static str,
    pub client_name: &'static str,
    pub client_version: &'static str,
    /// Extra fields merged into `context.client`.
    pub client_extra: Value,
    /// Extra fields merged into `context` (e.g. `thirdParty`).
    pub context_extra: Value,
}

impl ClientProfile {
    pub fn android_vr() -> Self {
        Self {
            name: "ANDROID_VR",
            transport: ProfileTransport::Player,
            user_agent: ANDROID_VR_USER_AGENT,
            client_name: "ANDROID_VR",
            client_version: "1.71.26",
            client_extra: json!({
                "deviceMake": "Oculus",
                "deviceModel": "Quest 3",
                "androidSdkVersion": 32,
                "osName": "Android",
                "osVersion": "12L",
            }),
            context_extra: json!({}),
        }
    }

    pub fn web_embedded() -> Self {
        Self {
            name: "WEB_EMBEDDED_PLAYER",
            transport: ProfileTransport::Player,
            user_agent: DESKTOP_USER_AGENT,
            client_name: "WEB_EMBEDDED_PLAYER",
            client_version: "1.20260115.01.00",
            client_extra: json!({}),
            context_extra: json!({
                "thirdParty": { "embedUrl": "https://www.youtube.com/" },
            }),
        }
    }

    pub fn mirror() -> Self {
        Self {
            name: "MIRROR",
            transport: ProfileTransport::Mirror,
            user_agent: DESKTOP_USER_AGENT,
            client_name: "",
            client_version: "",
            client_extra: json!({}),
            context_extra: json!({}),
        }
    }

    /// JSON body of the player request for this profile.
    pub fn player_body(&self, video_id: &str) -> Value {
        let mut client = json!({
            "clientName": self.client_name,
            "clientVersion": self.client_version,
        });
        merge_object(&mut client, &self.client_extra);

        let mut context = json!({ "client": client });
        merge_object(&mut context, &self.context_extra);

        json!({
            "videoId": video_id,
            "context": context,
            "playbackContext": {
                "contentPlaybackContext": { "html5Preference": "HTML5_PREF_WANTS" },
            },
            "contentCheckOk": true,
            "racyCheckOk": true,
        })
    }
}

fn merge_object(target: &mut Value, extra: &Value) {
    if let (Some(target), Some(extra)) = (target.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// Profiles in fixed priority order. The mirror profile goes last.
pub fn default_profiles(use_mirrors: bool) -> Vec<ClientProfile> {
    let mut profiles = vec![ClientProfile::android_vr(), ClientProfile::web_embedded()];
    if use_mirrors {
        profiles.push(ClientProfile::mirror());
    }
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_fixed() {
        let names: Vec<_> = default_profiles(true).iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["ANDROID_VR", "WEB_EMBEDDED_PLAYER", "MIRROR"]);
        assert_eq!(default_profiles(false).len(), 2);
    }

    #[test]
    fn vr_body_carries_device_fields() {
        let body = ClientProfile::android_vr().player_body("dQw4w9WgXcQ");
        assert_eq!(body["videoId"], "dQw4w9WgXcQ");
        assert_eq!(body["context"]["client"]["clientName"], "ANDROID_VR");
        assert_eq!(body["context"]["client"]["deviceModel"], "Quest 3");
        assert_eq!(body["contentCheckOk"], true);
        assert!(body["context"].get("thirdParty").is_none());
    }

    #[test]
    fn embedded_body_carries_embed_url() {
        let body = ClientProfile::web_embedded().player_body("dQw4w9WgXcQ");
        assert_eq!(
            body["context"]["thirdParty"]["embedUrl"],
            "https://www.youtube.com/"
        );
        assert!(body["context"]["client"].get("deviceMake").is_none());
    }
}
