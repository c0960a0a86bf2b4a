//! Persisted data model: streams, layout cells, chat overlays and grids.
//!
//! JSON keys are camelCase so grid files written by earlier releases of the
//! desktop app load without migration.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::classify::{self, StreamKind};

/// Version string written into new manifests.
pub const MANIFEST_VERSION: &str = "1.0";

/// How a player scales video into its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    #[default]
    Contain,
    Cover,
}

/// One stream placed on a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub logo_url: String,
    /// The URL as entered by the user.
    pub stream_url: String,
    /// Canonical page URL derived from `stream_url`, when the kind has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_url: Option<String>,
    #[serde(default, rename = "typeTag")]
    pub kind: StreamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_mode: Option<FitMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_livestream: Option<bool>,
}

impl StreamEntry {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        logo_url: impl Into<String>,
        stream_url: impl Into<String>,
    ) -> Self {
        let mut entry = Self {
            id: id.into(),
            name: name.into(),
            logo_url: logo_url.into(),
            stream_url: stream_url.into(),
            display_url: None,
            kind: StreamKind::Other,
            fit_mode: None,
            is_livestream: None,
        };
        entry.refresh_kind();
        entry
    }

    /// Re-run the classifier on `stream_url` and update the derived fields.
    pub fn refresh_kind(&mut self) {
        let classification = classify::classify(&self.stream_url);
        self.kind = classification.kind;
        self.display_url = classification.canonical_url();
    }

    /// Identifier extracted by the classifier (video id / channel name).
    pub fn identifier(&self) -> Option<String> {
        classify::classify(&self.stream_url).identifier
    }
}

/// Position and size of one grid item, in column/row units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutCell {
    #[serde(rename = "i")]
    pub item_id: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    #[serde(default, rename = "static", skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
}

impl LayoutCell {
    pub fn new(item_id: impl Into<String>, x: i32, y: i32, w: i32, h: i32) -> Self {
        Self {
            item_id: item_id.into(),
            x,
            y,
            w,
            h,
            pinned: false,
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.h)
    }

    /// Axis-aligned rectangle intersection. Touching edges do not overlap.
    pub fn intersects(&self, other: &LayoutCell) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }
}

/// A chat panel attached to a YouTube or Twitch stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOverlay {
    pub id: String,
    pub stream_id: String,
    #[serde(default)]
    pub stream_type: StreamKind,
    /// Video id (YouTube) or channel name (Twitch).
    #[serde(alias = "streamIdentifier")]
    pub identifier: String,
    #[serde(alias = "streamName")]
    pub display_name: String,
}

/// The unit of persistence: a named collection of streams, layout and chats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grid {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Base64 screenshot, when the host UI provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub streams: Vec<StreamEntry>,
    #[serde(default)]
    pub layout: Vec<LayoutCell>,
    #[serde(default)]
    pub chats: Vec<ChatOverlay>,
}

impl Grid {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("grid"),
            name: name.into(),
            created_at: now,
            last_modified: now,
            thumbnail: None,
            streams: Vec::new(),
            layout: Vec::new(),
            chats: Vec::new(),
        }
    }

    pub fn file_name(&self) -> String {
        grid_file_name(&self.id)
    }

    pub fn summary(&self) -> GridSummary {
        GridSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            last_modified: self.last_modified,
            stream_count: self.streams.len(),
            file_name: self.file_name(),
        }
    }

    pub fn to_exchange(&self) -> ExchangeData {
        ExchangeData {
            streams: self.streams.clone(),
            layout: self.layout.clone(),
            chats: self.chats.clone(),
        }
    }
}

/// File name used for a grid document.
pub fn grid_file_name(id: &str) -> String {
    format!("grid-{}.json", id)
}

/// Manifest entry describing one saved grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub stream_count: usize,
    pub file_name: String,
}

/// Index over all saved grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridManifest {
    pub version: String,
    pub current_grid_id: Option<String>,
    #[serde(default)]
    pub grids: Vec<GridSummary>,
}

impl Default for GridManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            current_grid_id: None,
            grids: Vec::new(),
        }
    }
}

impl GridManifest {
    pub fn get(&self, id: &str) -> Option<&GridSummary> {
        self.grids.iter().find(|g| g.id == id)
    }

    /// Insert or replace the entry with the same id.
    pub fn upsert(&mut self, summary: GridSummary) {
        match self.grids.iter_mut().find(|g| g.id == summary.id) {
            Some(existing) => *existing = summary,
            None => self.grids.push(summary),
        }
    }

    /// Remove an entry. Returns the removed summary.
    pub fn remove(&mut self, id: &str) -> Option<GridSummary> {
        let pos = self.grids.iter().position(|g| g.id == id)?;
        if self.current_grid_id.as_deref() == Some(id) {
            self.current_grid_id = None;
        }
        Some(self.grids.remove(pos))
    }
}

/// Cross-grid import/export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExchangeData {
    pub streams: Vec<StreamEntry>,
    pub layout: Vec<LayoutCell>,
    #[serde(default)]
    pub chats: Vec<ChatOverlay>,
}

/// `<prefix>-<unix millis>-<9 random chars>`.
pub fn new_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), suffix)
}
