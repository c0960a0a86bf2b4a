//! Debounced mutation and persistence coordinator.
//!
//! Layout drags and stream edits are buffered and committed to the store
//! when their debounce fires. A longer save debounce restarts whenever the
//! store becomes dirty; when it fires, `poll` hands back a snapshot for the
//! owner to write. Writes happen outside, and their completion comes back
//! through `save_finished`.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::PersistenceConfig;
use crate::debounce::{earliest, Debounce};
use crate::model::{Grid, LayoutCell, StreamEntry};
use crate::store::{StreamPatch, StreamStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SaveStatus {
    Clean,
    Dirty,
    Saving { revision: u64 },
    Saved { revision: u64 },
    Failed { revision: u64, error: String },
}

impl SaveStatus {
    /// True when the UI should show an "unsaved" marker.
    pub fn is_unsaved(&self) -> bool {
        matches!(self, SaveStatus::Dirty | SaveStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebounceStatus {
    pub layout_pending: bool,
    pub pending_streams: usize,
    pub save_pending: bool,
    pub save_in_flight: bool,
}

/// A snapshot that should be written, tagged with the revision it captures.
#[derive(Debug, Clone)]
pub struct PendingSave {
    pub revision: u64,
    pub grid: Grid,
}

pub struct MutationCoordinator {
    pending_layout: Option<Vec<LayoutCell>>,
    pending_patches: BTreeMap<String, StreamPatch>,
    layout_timer: Debounce,
    stream_timer: Debounce,
    save_timer: Debounce,
    save_in_flight: Option<u64>,
    status: SaveStatus,
    seen_revision: u64,
}

impl MutationCoordinator {
    pub fn new(cfg: &PersistenceConfig) -> Self {
        Self {
            pending_layout: None,
            pending_patches: BTreeMap::new(),
            layout_timer: Debounce::new(cfg.layout_debounce()),
            stream_timer: Debounce::new(cfg.stream_debounce()),
            save_timer: Debounce::new(cfg.save_debounce()),
            save_in_flight: None,
            status: SaveStatus::Clean,
            seen_revision: 0,
        }
    }

    pub fn update_layout(&mut self, layout: Vec<LayoutCell>, now: Instant) {
        self.pending_layout = Some(layout);
        self.layout_timer.schedule(now);
    }

    pub fn update_stream(&mut self, id: &str, patch: StreamPatch, now: Instant) {
        self.pending_patches
            .entry(id.to_string())
            .or_default()
            .merge(patch);
        self.stream_timer.schedule(now);
    }

    /// Layout goes through the layout debounce; streams are replaced at once.
    pub fn batch_update(
        &mut self,
        streams: Option<Vec<StreamEntry>>,
        layout: Option<Vec<LayoutCell>>,
        store: &mut StreamStore,
        now: Instant,
    ) {
        if let Some(layout) = layout {
            self.update_layout(layout, now);
        }
        if streams.is_some() {
            store.batch_update(streams, None);
            self.observe(store, now);
        }
    }

    /// Note a store transition made outside the coordinator. Restarts the
    /// save debounce while the store is dirty.
    pub fn observe(&mut self, store: &StreamStore, now: Instant) {
        if store.revision() == self.seen_revision {
            return;
        }
        self.seen_revision = store.revision();
        if store.has_unsaved_changes() {
            self.save_timer.schedule(now);
            if !matches!(self.status, SaveStatus::Saving { .. }) {
                self.status = SaveStatus::Dirty;
            }
        } else {
            self.save_timer.cancel();
            if self.save_in_flight.is_none() {
                self.status = SaveStatus::Clean;
            }
        }
    }

    /// Fire due timers. Returns a snapshot when a save should be written.
    pub fn poll(&mut self, store: &mut StreamStore, now: Instant) -> Option<PendingSave> {
        if self.layout_timer.fire(now) {
            self.commit_layout(store);
        }
        if self.stream_timer.fire(now) {
            self.commit_patches(store);
        }
        self.observe(store, now);

        if !self.save_timer.fire(now) {
            return None;
        }
        if !store.has_unsaved_changes() {
            return None;
        }
        if let Some(rev) = self.save_in_flight {
            debug!("save due but rev {} still in flight, deferring", rev);
            return None;
        }
        Some(self.begin_save(store))
    }

    /// Flush everything and snapshot for an immediate write, optionally
    /// renaming the grid first.
    pub fn save_now(&mut self, store: &mut StreamStore, name: Option<&str>) -> PendingSave {
        self.save_timer.cancel();
        self.flush(store);
        if let Some(name) = name {
            store.rename(name);
        }
        self.seen_revision = store.revision();
        self.begin_save(store)
    }

    /// Commit buffered layout and stream edits right away.
    pub fn flush(&mut self, store: &mut StreamStore) {
        self.layout_timer.cancel();
        self.stream_timer.cancel();
        self.commit_layout(store);
        self.commit_patches(store);
    }

    fn commit_layout(&mut self, store: &mut StreamStore) {
        if let Some(layout) = self.pending_layout.take() {
            let layout = store.reconcile_layout(layout);
            store.update_layout(layout);
        }
    }

    fn commit_patches(&mut self, store: &mut StreamStore) {
        if self.pending_patches.is_empty() {
            return;
        }
        let patches = std::mem::take(&mut self.pending_patches);
        let changed = store.apply_patches(&patches);
        debug!("committed {} of {} pending stream patch(es)", changed, patches.len());
    }

    fn begin_save(&mut self, store: &StreamStore) -> PendingSave {
        let revision = store.revision();
        self.save_in_flight = Some(revision);
        self.status = SaveStatus::Saving { revision };
        PendingSave {
            revision,
            grid: store.snapshot(),
        }
    }

    /// Record the outcome of a write started from `poll` or `save_now`.
    pub fn save_finished(
        &mut self,
        revision: u64,
        result: Result<(), String>,
        store: &mut StreamStore,
        now: Instant,
    ) {
        let newer_in_flight = self.save_in_flight.is_some_and(|rev| rev > revision);
        if self.save_in_flight == Some(revision) {
            self.save_in_flight = None;
        }
        match result {
            Ok(()) => {
                store.mark_saved(revision);
                self.seen_revision = store.revision();
                if newer_in_flight {
                    debug!("rev {} saved, a newer write is still in flight", revision);
                    return;
                }
                if store.has_unsaved_changes() {
                    debug!("rev {} saved, rev {} still pending", revision, store.revision());
                    self.save_timer.schedule(now);
                    self.status = SaveStatus::Dirty;
                } else {
                    info!("grid '{}' saved (rev {})", store.grid_name(), revision);
                    self.status = SaveStatus::Saved { revision };
                }
            }
            Err(error) => {
                error!("saving rev {} failed: {}", revision, error);
                self.status = SaveStatus::Failed { revision, error };
            }
        }
    }

    /// Forget an in-flight save whose grid is no longer loaded.
    pub fn abandon_save(&mut self, revision: u64) {
        if self.save_in_flight == Some(revision) {
            self.save_in_flight = None;
        }
    }

    /// Layout waiting for its debounce, if any.
    pub fn pending_layout(&self) -> Option<&[LayoutCell]> {
        self.pending_layout.as_deref()
    }

    /// Drop buffered edits without committing them.
    pub fn cancel_pending(&mut self) {
        self.pending_layout = None;
        self.pending_patches.clear();
        self.layout_timer.cancel();
        self.stream_timer.cancel();
    }

    pub fn has_pending_updates(&self) -> bool {
        self.pending_layout.is_some() || !self.pending_patches.is_empty()
    }

    pub fn status(&self) -> &SaveStatus {
        &self.status
    }

    pub fn debounce_status(&self) -> DebounceStatus {
        DebounceStatus {
            layout_pending: self.pending_layout.is_some(),
            pending_streams: self.pending_patches.len(),
            save_pending: self.save_timer.is_pending(),
            save_in_flight: self.save_in_flight.is_some(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.layout_timer.deadline(),
            self.stream_timer.deadline(),
            self.save_timer.deadline(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn setup() -> (MutationCoordinator, StreamStore, Instant) {
        let coord = MutationCoordinator::new(&PersistenceConfig::default());
        let mut store = StreamStore::new(LayoutConfig::default());
        store.add_stream(StreamEntry::new("s1", "One", "logo", "https://twitch.tv/someuser"));
        store.mark_saved(store.revision());
        (coord, store, Instant::now())
    }

    #[test]
    fn test_rapid_stream_edits_commit_once() {
        let (mut c, mut store, t0) = setup();
        let rev = store.revision();
        c.update_stream("s1", StreamPatch::name("A"), t0);
        c.update_stream(
            "s1",
            StreamPatch {
                logo_url: Some("https://example.com/new.png".into()),
                ..StreamPatch::default()
            },
            t0 + ms(100),
        );
        c.update_stream("s1", StreamPatch::name("C"), t0 + ms(200));

        assert!(c.poll(&mut store, t0 + ms(600)).is_none());
        assert_eq!(store.revision(), rev);
        assert!(c.has_pending_updates());

        assert!(c.poll(&mut store, t0 + ms(700)).is_none());
        assert_eq!(store.revision(), rev + 1);
        let s = store.stream("s1").unwrap();
        assert_eq!(s.name, "C");
        assert_eq!(s.logo_url, "https://example.com/new.png");
        assert!(!c.has_pending_updates());
        assert_eq!(c.status(), &SaveStatus::Dirty);
    }

    #[test]
    fn test_layout_debounce_keeps_last_layout() {
        let (mut c, mut store, t0) = setup();
        c.update_layout(vec![LayoutCell::new("s1", 3, 0, 3, 3)], t0);
        c.update_layout(vec![LayoutCell::new("s1", 6, 0, 3, 3)], t0 + ms(200));
        c.poll(&mut store, t0 + ms(400));
        assert_eq!(store.layout()[0].x, 0);
        c.poll(&mut store, t0 + ms(500));
        assert_eq!(store.layout()[0].x, 6);
    }

    #[test]
    fn test_save_fires_after_quiet_period() {
        let (mut c, mut store, t0) = setup();
        c.update_stream("s1", StreamPatch::name("A"), t0);
        c.poll(&mut store, t0 + ms(500));
        assert!(c.poll(&mut store, t0 + ms(5400)).is_none());
        let save = c.poll(&mut store, t0 + ms(5500)).expect("save due");
        assert_eq!(save.revision, store.revision());
        assert_eq!(save.grid.streams[0].name, "A");
        assert!(c.debounce_status().save_in_flight);

        c.save_finished(save.revision, Ok(()), &mut store, t0 + ms(5600));
        assert!(!store.has_unsaved_changes());
        assert_eq!(c.status(), &SaveStatus::Saved { revision: save.revision });
        assert!(c.next_deadline().is_none());
    }

    #[test]
    fn test_late_completion_keeps_newer_edit_dirty() {
        let (mut c, mut store, t0) = setup();
        store.update_stream("s1", &StreamPatch::name("first"));
        c.observe(&store, t0);
        let save = c.save_now(&mut store, None);

        store.update_stream("s1", &StreamPatch::name("second"));
        c.observe(&store, t0 + ms(10));
        c.save_finished(save.revision, Ok(()), &mut store, t0 + ms(20));

        assert!(store.has_unsaved_changes());
        assert_eq!(c.status(), &SaveStatus::Dirty);
        assert!(c.debounce_status().save_pending);
    }

    #[test]
    fn test_save_deferred_while_in_flight() {
        let (mut c, mut store, t0) = setup();
        store.update_stream("s1", &StreamPatch::name("first"));
        c.observe(&store, t0);
        let first = c.save_now(&mut store, None);

        store.update_stream("s1", &StreamPatch::name("second"));
        c.observe(&store, t0);
        assert!(c.poll(&mut store, t0 + ms(5000)).is_none());

        c.save_finished(first.revision, Ok(()), &mut store, t0 + ms(5100));
        let second = c.poll(&mut store, t0 + ms(10_100)).expect("retried after flight");
        assert_eq!(second.grid.streams[0].name, "second");
    }

    #[test]
    fn test_earlier_write_waits_for_newest() {
        let (mut c, mut store, t0) = setup();
        store.update_stream("s1", &StreamPatch::name("first"));
        c.observe(&store, t0);
        let first = c.save_now(&mut store, None);
        store.update_stream("s1", &StreamPatch::name("second"));
        c.observe(&store, t0);
        let second = c.save_now(&mut store, None);

        c.save_finished(first.revision, Ok(()), &mut store, t0 + ms(10));
        assert_eq!(c.status(), &SaveStatus::Saving { revision: second.revision });
        assert!(c.debounce_status().save_in_flight);
        assert!(c.next_deadline().is_none());

        c.save_finished(second.revision, Ok(()), &mut store, t0 + ms(20));
        assert!(!store.has_unsaved_changes());
        assert_eq!(c.status(), &SaveStatus::Saved { revision: second.revision });
    }

    #[test]
    fn test_save_now_flushes_and_renames() {
        let (mut c, mut store, t0) = setup();
        c.update_stream("s1", StreamPatch::name("pending"), t0);
        c.update_layout(vec![LayoutCell::new("s1", 9, 0, 3, 3)], t0);
        let save = c.save_now(&mut store, Some("Renamed"));
        assert_eq!(save.grid.name, "Renamed");
        assert_eq!(save.grid.streams[0].name, "pending");
        assert_eq!(save.grid.layout[0].x, 9);
        assert!(!c.has_pending_updates());
        assert!(c.next_deadline().is_none());
    }

    #[test]
    fn test_failed_save_surfaces_unsaved() {
        let (mut c, mut store, t0) = setup();
        store.update_stream("s1", &StreamPatch::name("x"));
        c.observe(&store, t0);
        let save = c.save_now(&mut store, None);
        c.save_finished(save.revision, Err("disk full".into()), &mut store, t0);
        assert!(c.status().is_unsaved());
        assert!(store.has_unsaved_changes());
        assert!(c.next_deadline().is_none());
    }

    #[test]
    fn test_cancel_pending_discards_buffers() {
        let (mut c, mut store, t0) = setup();
        let rev = store.revision();
        c.update_stream("s1", StreamPatch::name("never"), t0);
        c.update_layout(vec![], t0);
        c.cancel_pending();
        c.poll(&mut store, t0 + ms(10_000));
        assert_eq!(store.revision(), rev);
        assert_eq!(store.stream("s1").unwrap().name, "One");
    }

    #[test]
    fn test_batch_update_streams_immediate_layout_debounced() {
        let (mut c, mut store, t0) = setup();
        let streams = vec![StreamEntry::new("s1", "Swapped", "logo", "https://twitch.tv/someuser")];
        c.batch_update(Some(streams), Some(vec![LayoutCell::new("s1", 3, 3, 3, 3)]), &mut store, t0);
        assert_eq!(store.stream("s1").unwrap().name, "Swapped");
        assert_eq!(store.layout()[0].y, 0);
        c.poll(&mut store, t0 + ms(300));
        assert_eq!((store.layout()[0].x, store.layout()[0].y), (3, 3));
    }
}
