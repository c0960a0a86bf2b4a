//! In-memory state of the grid being edited.
//!
//! Every committed transition bumps `revision` exactly once. A save
//! remembers the revision it wrote; the store is dirty while
//! `revision != saved_revision`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::LayoutConfig;
use crate::error::ImportError;
use crate::exchange::{self, ImportReport};
use crate::model::{new_id, ChatOverlay, ExchangeData, FitMode, Grid, LayoutCell, StreamEntry};
use crate::placement::{self, Tiling};

pub const DEFAULT_GRID_NAME: &str = "Untitled Grid";

/// Partial update to a stream. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_mode: Option<FitMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_livestream: Option<bool>,
}

impl StreamPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fold `later` into `self`; fields set in `later` win.
    pub fn merge(&mut self, later: StreamPatch) {
        if later.name.is_some() {
            self.name = later.name;
        }
        if later.logo_url.is_some() {
            self.logo_url = later.logo_url;
        }
        if later.stream_url.is_some() {
            self.stream_url = later.stream_url;
        }
        if later.fit_mode.is_some() {
            self.fit_mode = later.fit_mode;
        }
        if later.is_livestream.is_some() {
            self.is_livestream = later.is_livestream;
        }
    }

    /// Returns true when `entry` changed.
    fn apply_to(&self, entry: &mut StreamEntry) -> bool {
        let before = entry.clone();
        if let Some(name) = &self.name {
            entry.name = name.clone();
        }
        if let Some(logo) = &self.logo_url {
            entry.logo_url = logo.clone();
        }
        if let Some(url) = &self.stream_url {
            if *url != entry.stream_url {
                entry.stream_url = url.clone();
                entry.refresh_kind();
            }
        }
        if self.fit_mode.is_some() {
            entry.fit_mode = self.fit_mode;
        }
        if self.is_livestream.is_some() {
            entry.is_livestream = self.is_livestream;
        }
        *entry != before
    }
}

#[derive(Debug, Clone)]
pub struct StreamStore {
    config: LayoutConfig,
    grid_id: String,
    grid_name: String,
    created_at: DateTime<Utc>,
    thumbnail: Option<String>,
    streams: Vec<StreamEntry>,
    layout: Vec<LayoutCell>,
    chats: Vec<ChatOverlay>,
    last_dragged: Option<String>,
    revision: u64,
    saved_revision: u64,
}

impl StreamStore {
    /// Empty, clean store for a fresh grid.
    pub fn new(config: LayoutConfig) -> Self {
        let grid = Grid::new(DEFAULT_GRID_NAME);
        let mut store = Self {
            config,
            grid_id: String::new(),
            grid_name: String::new(),
            created_at: grid.created_at,
            thumbnail: None,
            streams: Vec::new(),
            layout: Vec::new(),
            chats: Vec::new(),
            last_dragged: None,
            revision: 0,
            saved_revision: 0,
        };
        store.replace_with(grid);
        store
    }

    pub fn from_grid(config: LayoutConfig, grid: Grid) -> Self {
        let mut store = Self::new(config);
        store.replace_with(grid);
        store
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn grid_id(&self) -> &str {
        &self.grid_id
    }

    pub fn grid_name(&self) -> &str {
        &self.grid_name
    }

    pub fn streams(&self) -> &[StreamEntry] {
        &self.streams
    }

    pub fn stream(&self, id: &str) -> Option<&StreamEntry> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn layout(&self) -> &[LayoutCell] {
        &self.layout
    }

    pub fn chats(&self) -> &[ChatOverlay] {
        &self.chats
    }

    pub fn last_dragged(&self) -> Option<&str> {
        self.last_dragged.as_deref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn saved_revision(&self) -> u64 {
        self.saved_revision
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.revision != self.saved_revision
    }

    fn bump(&mut self, action: &str) {
        self.revision += 1;
        debug!("store {} → rev {}", action, self.revision);
    }

    // ── Streams ────────────────────────────────────────────────────────────

    /// Append a stream and give it the next free tiling slot.
    /// Returns false when the id is already present.
    pub fn add_stream(&mut self, entry: StreamEntry) -> bool {
        if self.stream(&entry.id).is_some() {
            warn!("add_stream: duplicate id '{}'", entry.id);
            return false;
        }
        let cell = placement::place_new(
            &entry.id,
            &self.layout,
            self.config.stream_cell,
            Tiling::from_config(&self.config),
            self.config.collision,
        );
        self.layout.push(cell);
        self.streams.push(entry);
        self.bump("add_stream");
        true
    }

    /// Remove a stream together with its chats and all their layout cells.
    pub fn remove_stream(&mut self, id: &str) -> bool {
        let Some(pos) = self.streams.iter().position(|s| s.id == id) else {
            return false;
        };
        self.streams.remove(pos);
        self.drop_chats_of(id);
        self.layout.retain(|cell| cell.item_id != id);
        if self.last_dragged.as_deref() == Some(id) {
            self.last_dragged = None;
        }
        self.bump("remove_stream");
        true
    }

    /// Apply one patch immediately. A name change is copied onto the
    /// stream's chat overlays.
    pub fn update_stream(&mut self, id: &str, patch: &StreamPatch) -> bool {
        let changed = self.patch_one(id, patch);
        if changed {
            self.bump("update_stream");
        }
        changed
    }

    /// Apply several patches as one transition. Unknown ids are skipped.
    /// Returns how many streams changed.
    pub fn apply_patches<'a, I>(&mut self, patches: I) -> usize
    where
        I: IntoIterator<Item = (&'a String, &'a StreamPatch)>,
    {
        let mut changed = 0;
        for (id, patch) in patches {
            if self.patch_one(id, patch) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.bump("apply_patches");
        }
        changed
    }

    fn patch_one(&mut self, id: &str, patch: &StreamPatch) -> bool {
        let Some(entry) = self.streams.iter_mut().find(|s| s.id == id) else {
            debug!("patch for unknown stream '{}' dropped", id);
            return false;
        };
        if !patch.apply_to(entry) {
            return false;
        }
        if let Some(name) = &patch.name {
            for chat in self.chats.iter_mut().filter(|c| c.stream_id == id) {
                chat.display_name = name.clone();
            }
        }
        true
    }

    // ── Layout ─────────────────────────────────────────────────────────────

    /// Commit a layout, applying the collision policy.
    pub fn update_layout(&mut self, layout: Vec<LayoutCell>) {
        self.layout = placement::resolve(layout, self.config.collision, self.config.columns);
        self.bump("update_layout");
    }

    /// Fit a layout captured earlier to the items that exist now: cells of
    /// removed items are dropped, duplicates keep their first cell, and
    /// items the layout does not mention keep their current cell.
    pub fn reconcile_layout(&self, layout: Vec<LayoutCell>) -> Vec<LayoutCell> {
        let known: HashSet<&str> = self
            .streams
            .iter()
            .map(|s| s.id.as_str())
            .chain(self.chats.iter().map(|c| c.id.as_str()))
            .collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut out: Vec<LayoutCell> = layout
            .into_iter()
            .filter(|cell| known.contains(cell.item_id.as_str()) && seen.insert(cell.item_id.clone()))
            .collect();
        let missing: Vec<LayoutCell> = self
            .layout
            .iter()
            .filter(|cell| !seen.contains(&cell.item_id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            debug!("reconcile_layout: kept {} current cell(s)", missing.len());
        }
        out.extend(missing);
        out
    }

    /// Replace streams and/or layout in one transition.
    pub fn batch_update(&mut self, streams: Option<Vec<StreamEntry>>, layout: Option<Vec<LayoutCell>>) {
        if streams.is_none() && layout.is_none() {
            return;
        }
        if let Some(mut streams) = streams {
            for s in &mut streams {
                s.refresh_kind();
            }
            self.streams = streams;
        }
        if let Some(layout) = layout {
            self.layout = placement::resolve(layout, self.config.collision, self.config.columns);
        }
        self.bump("batch_update");
    }

    pub fn set_last_dragged(&mut self, id: Option<String>) {
        self.last_dragged = id;
    }

    // ── Chats ──────────────────────────────────────────────────────────────

    /// Attach a chat panel to a YouTube or Twitch stream. Returns the new
    /// overlay id, or `None` when the stream cannot have one.
    pub fn add_chat(&mut self, stream_id: &str) -> Option<String> {
        let stream = self.stream(stream_id)?;
        if !stream.kind.supports_chat() {
            debug!("add_chat: {} stream '{}' has no chat", stream.kind, stream_id);
            return None;
        }
        let identifier = stream.identifier()?;
        let chat = ChatOverlay {
            id: new_id("chat"),
            stream_id: stream_id.to_string(),
            stream_type: stream.kind,
            identifier,
            display_name: stream.name.clone(),
        };
        let cell = placement::place_new(
            &chat.id,
            &self.layout,
            self.config.chat_cell,
            Tiling::from_config(&self.config),
            self.config.collision,
        );
        let id = chat.id.clone();
        self.layout.push(cell);
        self.chats.push(chat);
        self.bump("add_chat");
        Some(id)
    }

    pub fn remove_chat(&mut self, id: &str) -> bool {
        let before = self.chats.len();
        self.chats.retain(|c| c.id != id);
        if self.chats.len() == before {
            return false;
        }
        self.layout.retain(|cell| cell.item_id != id);
        self.bump("remove_chat");
        true
    }

    pub fn remove_chats_for_stream(&mut self, stream_id: &str) -> usize {
        let removed = self.drop_chats_of(stream_id);
        if removed > 0 {
            self.bump("remove_chats_for_stream");
        }
        removed
    }

    fn drop_chats_of(&mut self, stream_id: &str) -> usize {
        let gone: HashSet<String> = self
            .chats
            .iter()
            .filter(|c| c.stream_id == stream_id)
            .map(|c| c.id.clone())
            .collect();
        self.chats.retain(|c| !gone.contains(&c.id));
        self.layout.retain(|cell| !gone.contains(&cell.item_id));
        gone.len()
    }

    // ── Import / export ────────────────────────────────────────────────────

    /// Replace streams, layout and chats with validated exchange data.
    pub fn import(&mut self, data: ExchangeData) {
        info!(
            "importing {} stream(s), {} cell(s), {} chat(s)",
            data.streams.len(),
            data.layout.len(),
            data.chats.len()
        );
        self.streams = data.streams;
        self.layout = placement::resolve(data.layout, self.config.collision, self.config.columns);
        self.chats = data.chats;
        self.bump("import");
    }

    /// Validate and import an untyped document. Never panics; the store is
    /// untouched on failure.
    pub fn import_value(&mut self, value: &Value) -> ImportReport {
        let result: Result<(), ImportError> = exchange::validate(value).map(|data| self.import(data));
        if let Err(e) = &result {
            warn!("import rejected: {}", e);
        }
        ImportReport::from(&result)
    }

    pub fn export(&self) -> ExchangeData {
        ExchangeData {
            streams: self.streams.clone(),
            layout: self.layout.clone(),
            chats: self.chats.clone(),
        }
    }

    // ── Grid lifecycle ─────────────────────────────────────────────────────

    /// Current state as a persistable grid.
    pub fn snapshot(&self) -> Grid {
        Grid {
            id: self.grid_id.clone(),
            name: self.grid_name.clone(),
            created_at: self.created_at,
            last_modified: Utc::now(),
            thumbnail: self.thumbnail.clone(),
            streams: self.streams.clone(),
            layout: self.layout.clone(),
            chats: self.chats.clone(),
        }
    }

    /// Switch to a loaded grid. The result is clean.
    pub fn load_grid(&mut self, grid: Grid) {
        info!("loaded grid '{}' ({})", grid.name, grid.id);
        self.replace_with(grid);
        self.bump("load_grid");
        self.saved_revision = self.revision;
    }

    /// Start an empty grid. It stays dirty until first saved.
    pub fn new_grid(&mut self, name: &str) -> String {
        let name = if name.trim().is_empty() {
            DEFAULT_GRID_NAME
        } else {
            name.trim()
        };
        self.replace_with(Grid::new(name));
        self.bump("new_grid");
        self.grid_id.clone()
    }

    pub fn rename(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() || name == self.grid_name {
            return;
        }
        self.grid_name = name.to_string();
        self.bump("rename");
    }

    /// Record that `revision` reached disk. Older completions never move
    /// `saved_revision` backwards.
    pub fn mark_saved(&mut self, revision: u64) {
        if revision > self.saved_revision {
            self.saved_revision = revision.min(self.revision);
        }
    }

    fn replace_with(&mut self, grid: Grid) {
        self.grid_id = grid.id;
        self.grid_name = grid.name;
        self.created_at = grid.created_at;
        self.thumbnail = grid.thumbnail;
        self.streams = grid.streams;
        for s in &mut self.streams {
            s.refresh_kind();
        }
        self.layout = grid.layout;
        self.chats = grid.chats;
        self.last_dragged = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::StreamKind;
    use crate::placement::{detect_overlap, CollisionPolicy};
    use std::collections::HashMap;

    fn store() -> StreamStore {
        StreamStore::new(LayoutConfig::default())
    }

    fn twitch(id: &str, channel: &str) -> StreamEntry {
        StreamEntry::new(id, channel, "https://example.com/logo.png", format!("https://twitch.tv/{}", channel))
    }

    #[test]
    fn test_new_store_is_clean() {
        let s = store();
        assert!(!s.has_unsaved_changes());
        assert_eq!(s.grid_name(), DEFAULT_GRID_NAME);
        assert!(s.grid_id().starts_with("grid-"));
    }

    #[test]
    fn test_add_stream_tiles_round_robin() {
        let mut s = store();
        for i in 0..4 {
            assert!(s.add_stream(twitch(&format!("s{}", i), "someuser")));
        }
        let pos: Vec<_> = s.layout().iter().map(|c| (c.x, c.y, c.w, c.h)).collect();
        assert_eq!(pos, vec![(0, 0, 3, 3), (3, 0, 3, 3), (6, 0, 3, 3), (0, 3, 3, 3)]);
        assert!(!s.add_stream(twitch("s0", "other")));
        assert_eq!(s.revision(), 4);
    }

    #[test]
    fn test_remove_stream_cascades_chats() {
        let mut s = store();
        s.add_stream(twitch("s1", "someuser"));
        s.add_stream(twitch("s2", "another"));
        let chat = s.add_chat("s1").unwrap();
        s.add_chat("s2").unwrap();
        assert_eq!(s.layout().len(), 4);

        assert!(s.remove_stream("s1"));
        assert!(s.chats().iter().all(|c| c.stream_id == "s2"));
        assert!(s.layout().iter().all(|c| c.item_id != "s1" && c.item_id != chat));
        assert_eq!(s.layout().len(), 2);
        assert!(!s.remove_stream("s1"));

        let rev = s.revision();
        assert_eq!(s.remove_chats_for_stream("s2"), 1);
        assert_eq!(s.revision(), rev + 1);
        assert_eq!(s.remove_chats_for_stream("s2"), 0);
        assert_eq!(s.revision(), rev + 1);
        assert_eq!(s.layout().len(), 1);
    }

    #[test]
    fn test_chat_only_for_chat_platforms() {
        let mut s = store();
        s.add_stream(StreamEntry::new("hls", "Cam", "logo", "https://cdn.example.com/live.m3u8"));
        s.add_stream(StreamEntry::new("yt", "News", "logo", "https://youtu.be/dQw4w9WgXcQ"));
        assert!(s.add_chat("hls").is_none());
        assert!(s.add_chat("missing").is_none());
        let id = s.add_chat("yt").unwrap();
        let chat = s.chats().iter().find(|c| c.id == id).unwrap();
        assert_eq!(chat.stream_type, StreamKind::YouTube);
        assert_eq!(chat.identifier, "dQw4w9WgXcQ");
        let cell = s.layout().iter().find(|c| c.item_id == id).unwrap();
        assert_eq!((cell.w, cell.h), (2, 3));
    }

    #[test]
    fn test_update_renames_chats_and_reclassifies() {
        let mut s = store();
        s.add_stream(twitch("s1", "someuser"));
        s.add_chat("s1");
        let patch = StreamPatch {
            name: Some("Renamed".into()),
            stream_url: Some("https://youtu.be/dQw4w9WgXcQ".into()),
            ..StreamPatch::default()
        };
        assert!(s.update_stream("s1", &patch));
        let stream = s.stream("s1").unwrap();
        assert_eq!(stream.kind, StreamKind::YouTube);
        assert_eq!(s.chats()[0].display_name, "Renamed");
        // no-op patch is not a transition
        let rev = s.revision();
        assert!(!s.update_stream("s1", &StreamPatch::name("Renamed")));
        assert_eq!(s.revision(), rev);
    }

    #[test]
    fn test_apply_patches_is_one_transition() {
        let mut s = store();
        s.add_stream(twitch("a", "someuser"));
        s.add_stream(twitch("b", "another"));
        let rev = s.revision();
        let mut patches = HashMap::new();
        patches.insert("a".to_string(), StreamPatch::name("A"));
        patches.insert("b".to_string(), StreamPatch::name("B"));
        patches.insert("zzz".to_string(), StreamPatch::name("ghost"));
        assert_eq!(s.apply_patches(&patches), 2);
        assert_eq!(s.revision(), rev + 1);
    }

    #[test]
    fn test_patch_merge_later_wins() {
        let mut p = StreamPatch::name("one");
        p.merge(StreamPatch {
            fit_mode: Some(FitMode::Cover),
            ..StreamPatch::default()
        });
        p.merge(StreamPatch::name("three"));
        assert_eq!(p.name.as_deref(), Some("three"));
        assert_eq!(p.fit_mode, Some(FitMode::Cover));
    }

    #[test]
    fn test_update_layout_applies_policy() {
        let overlapping = vec![LayoutCell::new("a", 0, 0, 4, 4), LayoutCell::new("b", 2, 2, 4, 4)];
        let mut s = store();
        s.update_layout(overlapping.clone());
        assert!(!detect_overlap(s.layout()));

        let cfg = LayoutConfig {
            collision: CollisionPolicy::Allow,
            ..LayoutConfig::default()
        };
        let mut s = StreamStore::new(cfg);
        s.update_layout(overlapping.clone());
        assert_eq!(s.layout(), overlapping.as_slice());
    }

    #[test]
    fn test_reconcile_layout_tracks_current_items() {
        let mut s = store();
        s.add_stream(twitch("a", "someuser"));
        let dragged = vec![LayoutCell::new("a", 6, 0, 3, 3), LayoutCell::new("a", 0, 9, 3, 3)];
        s.add_stream(twitch("b", "another"));
        let chat = s.add_chat("b").unwrap();

        let out = s.reconcile_layout(dragged.clone());
        let ids: Vec<_> = out.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", chat.as_str()]);
        assert_eq!(out[0].x, 6);

        s.remove_stream("a");
        let out = s.reconcile_layout(dragged);
        assert!(out.iter().all(|c| c.item_id != "a"));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_hostile_layout_numbers_are_clamped() {
        let stream = serde_json::to_value(twitch("a", "someuser")).unwrap();
        let doc = serde_json::json!({
            "streams": [stream],
            "layout": [
                {"i": "a", "x": 1, "y": 0, "w": 2147483647, "h": 3},
                {"i": "b", "x": 2, "y": 0, "w": 2, "h": 1e9},
                {"i": "c", "x": -1e12, "y": -5, "w": -4, "h": 1e300},
            ],
        });
        let mut s = store();
        let report = s.import_value(&doc);
        assert!(report.success, "{:?}", report.error);
        let columns = s.config().columns as i32;
        for cell in s.layout() {
            assert!(cell.x >= 0 && cell.right() <= columns, "{:?}", cell);
            assert!((1..=placement::ROW_CAP).contains(&cell.h), "{:?}", cell);
        }
    }

    #[test]
    fn test_stale_save_keeps_store_dirty() {
        let mut s = store();
        s.add_stream(twitch("a", "someuser"));
        let written = s.revision();
        s.update_stream("a", &StreamPatch::name("newer"));
        s.mark_saved(written);
        assert!(s.has_unsaved_changes());
        assert_eq!(s.saved_revision(), written);
        s.mark_saved(s.revision());
        assert!(!s.has_unsaved_changes());
        s.mark_saved(written);
        assert!(!s.has_unsaved_changes());
    }

    #[test]
    fn test_import_export_round_trip() {
        let mut s = store();
        s.add_stream(twitch("a", "someuser"));
        s.add_stream(StreamEntry::new("b", "Cam", "logo", "rtsp://cam.local/live"));
        s.add_chat("a");
        let exported = serde_json::to_value(s.export()).unwrap();

        let mut other = store();
        let report = other.import_value(&exported);
        assert!(report.success, "{:?}", report.error);
        assert_eq!(other.export(), s.export());
    }

    #[test]
    fn test_failed_import_leaves_state() {
        let mut s = store();
        s.add_stream(twitch("a", "someuser"));
        let rev = s.revision();
        let report = s.import_value(&serde_json::json!({"streams": 1, "layout": []}));
        assert!(!report.success);
        assert_eq!(s.streams().len(), 1);
        assert_eq!(s.revision(), rev);
    }

    #[test]
    fn test_load_grid_is_clean_and_new_grid_is_dirty() {
        let mut s = store();
        let mut grid = Grid::new("Saved");
        grid.streams.push(twitch("a", "someuser"));
        grid.layout.push(LayoutCell::new("a", 0, 0, 3, 3));
        s.load_grid(grid.clone());
        assert_eq!(s.grid_id(), grid.id);
        assert!(!s.has_unsaved_changes());

        let reopened = StreamStore::from_grid(LayoutConfig::default(), grid.clone());
        assert_eq!(reopened.streams(), grid.streams.as_slice());
        assert!(!reopened.has_unsaved_changes());

        let id = s.new_grid("  ");
        assert_ne!(id, grid.id);
        assert_eq!(s.grid_name(), DEFAULT_GRID_NAME);
        assert!(s.streams().is_empty());
        assert!(s.has_unsaved_changes());
    }
}
