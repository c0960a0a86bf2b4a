//! Stream-type classifier.
//!
//! Pure pattern matching over the URL string: no network access. The first
//! matching rule wins, in this order:
//!
//! ```text
//!  file://            → Local
//!  rtsp:// rtsps://   → Rtsp
//!  YouTube patterns   → YouTube (11-char video id when present)
//!  twitch.tv/<name>   → Twitch  (4–25 chars of [A-Za-z0-9_])
//!  .m3u8 / .mpd       → Hls / Dash
//!  anything else      → Other
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Type tag for a stream URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    #[serde(alias = "HLS")]
    Hls,
    #[serde(alias = "DASH")]
    Dash,
    #[serde(alias = "YouTube")]
    YouTube,
    #[serde(alias = "Twitch")]
    Twitch,
    #[serde(alias = "RTSP")]
    Rtsp,
    Local,
    #[default]
    #[serde(other)]
    Other,
}

impl StreamKind {
    /// Kinds whose platform provides a live chat panel.
    pub fn supports_chat(self) -> bool {
        matches!(self, StreamKind::YouTube | StreamKind::Twitch)
    }

    /// Kinds that need the RTSP→HLS side-channel before a player can show them.
    pub fn needs_transcode(self) -> bool {
        self == StreamKind::Rtsp
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamKind::Hls => "HLS",
            StreamKind::Dash => "DASH",
            StreamKind::YouTube => "YouTube",
            StreamKind::Twitch => "Twitch",
            StreamKind::Rtsp => "RTSP",
            StreamKind::Local => "Local",
            StreamKind::Other => "Other",
        };
        f.write_str(label)
    }
}

/// Result of classifying a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: StreamKind,
    /// YouTube video id or Twitch channel name.
    pub identifier: Option<String>,
}

impl Classification {
    fn new(kind: StreamKind, identifier: Option<String>) -> Self {
        Self { kind, identifier }
    }

    /// Canonical page URL for kinds that have one.
    pub fn canonical_url(&self) -> Option<String> {
        let id = self.identifier.as_deref()?;
        match self.kind {
            StreamKind::YouTube => Some(format!("https://www.youtube.com/watch?v={}", id)),
            StreamKind::Twitch => Some(format!("https://www.twitch.tv/{}", id)),
            _ => None,
        }
    }

    /// Embeddable player URL. Twitch requires the embedding host as `parent`.
    pub fn embed_url(&self, parent_host: &str) -> Option<String> {
        let id = self.identifier.as_deref()?;
        match self.kind {
            StreamKind::YouTube => Some(format!(
                "https://www.youtube.com/embed/{}?autoplay=1&mute=1",
                id
            )),
            StreamKind::Twitch => Some(format!(
                "https://player.twitch.tv/?channel={}&parent=localhost&parent={}",
                id, parent_host
            )),
            _ => None,
        }
    }

    /// Chat panel URL for YouTube live chat or the Twitch popout chat.
    pub fn chat_url(&self, parent_host: &str) -> Option<String> {
        let id = self.identifier.as_deref()?;
        match self.kind {
            StreamKind::YouTube => Some(format!(
                "https://www.youtube.com/live_chat?v={}&embed_domain={}&dark_theme=1",
                id, parent_host
            )),
            StreamKind::Twitch => Some(format!(
                "https://www.twitch.tv/embed/{}/chat?parent={}&darkpopout",
                id, parent_host
            )),
            _ => None,
        }
    }
}

struct Patterns {
    youtube_id: Vec<Regex>,
    youtube_handle_live: Regex,
    youtube_host: Regex,
    v_param: Regex,
    twitch: Regex,
    hls: Regex,
    dash: Vec<Regex>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("classifier pattern is valid");
        Patterns {
            youtube_id: vec![
                re(r"(?i)^(?:https?://)?(?:www\.|m\.)?youtube\.com/watch\?(?:[^#]*&)?v=([A-Za-z0-9_-]{11})(?:[&#]|$)"),
                re(r"(?i)^(?:https?://)?youtu\.be/([A-Za-z0-9_-]{11})(?:[/?#]|$)"),
                re(r"(?i)^(?:https?://)?(?:www\.|m\.)?youtube\.com/(?:live|embed|shorts)/([A-Za-z0-9_-]{11})(?:[/?#]|$)"),
            ],
            youtube_handle_live: re(r"(?i)^(?:https?://)?(?:www\.|m\.)?youtube\.com/@[^/?#]+/live(?:[/?#]|$)"),
            youtube_host: re(r"(?i)^(?:https?://)?(?:[a-z0-9-]+\.)*(?:youtube\.com|youtu\.be)(?:[/?#]|$)"),
            v_param: re(r"[?&]v=([A-Za-z0-9_-]{11})(?:[&#]|$)"),
            twitch: re(r"(?i)^(?:https?://)?(?:www\.|m\.)?twitch\.tv/([A-Za-z0-9_]{4,25})(?:[/?#]|$)"),
            hls: re(r"(?i)\.m3u8(?:\?.*)?$"),
            dash: vec![re(r"(?i)\.mpd(?:\?.*)?$"), re(r"(?i)manifest\.mpd")],
        }
    })
}

/// Classify a stream URL.
pub fn classify(url: &str) -> Classification {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    let p = patterns();

    if lower.starts_with("file://") {
        return Classification::new(StreamKind::Local, None);
    }
    if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
        return Classification::new(StreamKind::Rtsp, None);
    }

    if let Some(id) = p
        .youtube_id
        .iter()
        .find_map(|re| re.captures(url).map(|c| c[1].to_string()))
    {
        return Classification::new(StreamKind::YouTube, Some(id));
    }
    if p.youtube_handle_live.is_match(url) {
        return Classification::new(StreamKind::YouTube, None);
    }
    if p.youtube_host.is_match(url) {
        if let Some(caps) = p.v_param.captures(url) {
            return Classification::new(StreamKind::YouTube, Some(caps[1].to_string()));
        }
    }

    if let Some(caps) = p.twitch.captures(url) {
        return Classification::new(StreamKind::Twitch, Some(caps[1].to_string()));
    }

    if p.hls.is_match(url) {
        return Classification::new(StreamKind::Hls, None);
    }
    if p.dash.iter().any(|re| re.is_match(url)) {
        return Classification::new(StreamKind::Dash, None);
    }

    Classification::new(StreamKind::Other, None)
}

/// YouTube video id, if `url` is a YouTube URL carrying one.
pub fn youtube_video_id(url: &str) -> Option<String> {
    let c = classify(url);
    (c.kind == StreamKind::YouTube).then_some(c.identifier).flatten()
}

/// Twitch channel name, if `url` is a Twitch channel URL.
pub fn twitch_channel(url: &str) -> Option<String> {
    let c = classify(url);
    (c.kind == StreamKind::Twitch).then_some(c.identifier).flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(url: &str) -> StreamKind {
        classify(url).kind
    }

    #[test]
    fn test_youtube_short_link() {
        let c = classify("https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(c.kind, StreamKind::YouTube);
        assert_eq!(c.identifier.as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_youtube_variants() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://m.youtube.com/shorts/dQw4w9WgXcQ",
            "https://music.youtube.com/playlist?list=PL1&v=dQw4w9WgXcQ",
        ] {
            assert_eq!(
                youtube_video_id(url).as_deref(),
                Some("dQw4w9WgXcQ"),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_youtube_handle_live_has_no_id() {
        let c = classify("https://www.youtube.com/@nasa/live");
        assert_eq!(c.kind, StreamKind::YouTube);
        assert!(c.identifier.is_none());
        assert!(c.canonical_url().is_none());
    }

    #[test]
    fn test_twitch_channel() {
        let c = classify("https://twitch.tv/someuser");
        assert_eq!(c.kind, StreamKind::Twitch);
        assert_eq!(c.identifier.as_deref(), Some("someuser"));
        assert_eq!(
            twitch_channel("www.twitch.tv/Some_User_42?referrer=raid").as_deref(),
            Some("Some_User_42")
        );
    }

    #[test]
    fn test_twitch_name_length_bounds() {
        assert_eq!(kind_of("https://twitch.tv/abc"), StreamKind::Other);
        let long = format!("https://twitch.tv/{}", "a".repeat(26));
        assert_eq!(kind_of(&long), StreamKind::Other);
    }

    #[test]
    fn test_manifest_extensions() {
        assert_eq!(kind_of("foo.m3u8"), StreamKind::Hls);
        assert_eq!(
            kind_of("https://cdn.example.com/live/index.M3U8?token=abc"),
            StreamKind::Hls
        );
        assert_eq!(kind_of("https://cdn.example.com/a/stream.mpd"), StreamKind::Dash);
        assert_eq!(
            kind_of("https://cdn.example.com/manifest.mpd/segment?x=1"),
            StreamKind::Dash
        );
    }

    #[test]
    fn test_scheme_rules_win() {
        assert_eq!(kind_of("rtsp://host/stream"), StreamKind::Rtsp);
        assert_eq!(kind_of("RTSPS://cam.local:322/live.m3u8"), StreamKind::Rtsp);
        assert_eq!(kind_of("file:///home/me/clip.m3u8"), StreamKind::Local);
    }

    #[test]
    fn test_unmatched_is_other() {
        assert_eq!(kind_of("https://example.com/video.mp4"), StreamKind::Other);
        assert_eq!(kind_of(""), StreamKind::Other);
    }

    #[test]
    fn test_embed_and_chat_urls() {
        let c = classify("https://twitch.tv/someuser");
        assert_eq!(
            c.embed_url("app.local").as_deref(),
            Some("https://player.twitch.tv/?channel=someuser&parent=localhost&parent=app.local")
        );
        let yt = classify("https://youtu.be/dQw4w9WgXcQ");
        assert!(yt
            .chat_url("localhost")
            .unwrap()
            .starts_with("https://www.youtube.com/live_chat?v=dQw4w9WgXcQ"));
        assert!(classify("foo.m3u8").embed_url("localhost").is_none());
    }

    #[test]
    fn test_kind_serde_accepts_legacy_labels() {
        let k: StreamKind = serde_json::from_str("\"YouTube\"").unwrap();
        assert_eq!(k, StreamKind::YouTube);
        let k: StreamKind = serde_json::from_str("\"transitive\"").unwrap();
        assert_eq!(k, StreamKind::Other);
        assert_eq!(serde_json::to_string(&StreamKind::Hls).unwrap(), "\"hls\"");
    }
}
