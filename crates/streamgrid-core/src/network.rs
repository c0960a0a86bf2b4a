//! Optional network enrichment: YouTube titles and release checks.
//!
//! Nothing here is on the classification or save path; callers spawn these
//! and feed the result back as ordinary edits.

use std::cmp::Ordering;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::classify;
use crate::config::NetworkConfig;
use crate::error::FetchError;

const OEMBED_ENDPOINT: &str = "https://www.youtube.com/oembed";

#[derive(Debug, Clone)]
pub struct NetClient {
    client: reqwest::Client,
    update_repo: String,
}

impl NetClient {
    pub fn new(cfg: &NetworkConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .user_agent(concat!("streamgrid/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            update_repo: cfg.update_repo.clone(),
        })
    }

    /// Title of a YouTube video via oEmbed.
    pub async fn youtube_title(&self, url: &str) -> Result<String, FetchError> {
        let id = classify::youtube_video_id(url).ok_or_else(|| FetchError::NotYouTube(url.to_string()))?;
        let watch_url = format!("https://www.youtube.com/watch?v={}", id);
        let body: Value = self
            .client
            .get(OEMBED_ENDPOINT)
            .query(&[("url", watch_url.as_str()), ("format", "json")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let title = oembed_title(&body)?;
        debug!("oembed title for {}: {}", id, title);
        Ok(title)
    }

    /// Tag of the latest published release, without a leading `v`.
    pub async fn latest_release(&self) -> Result<String, FetchError> {
        let url = format!(
            "https://api.github.com/repos/{}/releases/latest",
            self.update_repo
        );
        let body: Value = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let tag = body
            .get("tag_name")
            .and_then(Value::as_str)
            .ok_or(FetchError::MissingField("tag_name"))?;
        Ok(tag.trim_start_matches(['v', 'V']).to_string())
    }

    /// The newer release, if `current` is behind it.
    pub async fn check_update(&self, current: &str) -> Result<Option<String>, FetchError> {
        let latest = self.latest_release().await?;
        Ok((compare_versions(&latest, current) == Ordering::Greater).then_some(latest))
    }
}

fn oembed_title(body: &Value) -> Result<String, FetchError> {
    body.get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(FetchError::MissingField("title"))
}

/// Compare dotted versions (`1.2.10` > `1.2.9`). Missing parts count as 0,
/// a leading `v` is ignored and a pre-release (`1.0.0-beta`) sorts before
/// its release.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn split(v: &str) -> (Vec<u64>, Option<&str>) {
        let v = v.trim().trim_start_matches(['v', 'V']);
        let (core, pre) = match v.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (v, None),
        };
        let nums = core
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().unwrap_or(0)
            })
            .collect();
        (nums, pre)
    }

    let (a_nums, a_pre) = split(a);
    let (b_nums, b_pre) = split(b);
    let len = a_nums.len().max(b_nums.len());
    for i in 0..len {
        let x = a_nums.get(i).copied().unwrap_or(0);
        let y = b_nums.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    match (a_pre, b_pre) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(y),
    }
}
