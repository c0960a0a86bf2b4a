//! Player pool.
//!
//! Handles cycle `idle → in use → idle → evicted`. The pool never grows past
//! `max_size`; when it is full, `acquire` returns `None` and the caller shows
//! a "no players available" state.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::StreamKind;
use crate::config::PoolSettings;

/// Whatever actually renders a stream: an embedded web view, a native video
/// surface, or a slot in a remote UI.
pub trait RenderTarget: Send + 'static {
    fn load(&mut self, url: &str, kind: StreamKind);
    /// Stop playback and release media resources.
    fn clear(&mut self);
}

/// A render target that only remembers what it was asked to show. The
/// session hands these to a host UI that owns the real players.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualPlayer {
    pub url: Option<String>,
    pub kind: Option<StreamKind>,
}

impl RenderTarget for VirtualPlayer {
    fn load(&mut self, url: &str, kind: StreamKind) {
        self.url = Some(url.to_string());
        self.kind = Some(kind);
    }

    fn clear(&mut self) {
        self.url = None;
        self.kind = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_size: usize,
    pub preload: usize,
    pub sweep_interval: Duration,
    pub max_idle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(s: &PoolSettings) -> Self {
        Self {
            max_size: s.max_size,
            preload: s.preload.min(s.max_size),
            sweep_interval: s.sweep_interval(),
            max_idle: s.max_idle(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub available: usize,
    pub max_size: usize,
}

struct PlayerHandle<T> {
    id: PlayerId,
    target: T,
    bound_stream: Option<String>,
    url: Option<String>,
    in_use: bool,
    last_released_at: Instant,
}

type Factory<T> = Box<dyn FnMut(PlayerId) -> T + Send>;

pub struct PlayerPool<T: RenderTarget> {
    config: PoolConfig,
    handles: Vec<PlayerHandle<T>>,
    factory: Factory<T>,
    next_id: u64,
}

impl<T: RenderTarget> PlayerPool<T> {
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: FnMut(PlayerId) -> T + Send + 'static,
    {
        Self {
            config,
            handles: Vec::new(),
            factory: Box::new(factory),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn create(&mut self, now: Instant) -> usize {
        let id = PlayerId(self.next_id);
        self.next_id += 1;
        let target = (self.factory)(id);
        self.handles.push(PlayerHandle {
            id,
            target,
            bound_stream: None,
            url: None,
            in_use: false,
            last_released_at: now,
        });
        debug!("player {} created ({} total)", id.0, self.handles.len());
        self.handles.len() - 1
    }

    /// Create idle handles until `preload` exist. Never exceeds `max_size`.
    pub fn preload(&mut self) -> usize {
        let now = Instant::now();
        let target = self.config.preload.min(self.config.max_size);
        let mut created = 0;
        while self.handles.len() < target {
            self.create(now);
            created += 1;
        }
        if created > 0 {
            info!("preloaded {} player(s)", created);
        }
        created
    }

    /// Bind a player to `stream_id` and point it at `url`.
    ///
    /// Reuses the handle already bound to the stream, then any idle handle,
    /// then creates one while below `max_size`.
    pub fn acquire(&mut self, stream_id: &str, url: &str, kind: StreamKind) -> Option<PlayerId> {
        let bound = self.position_of(stream_id);
        let idle = self.handles.iter().position(|h| !h.in_use);
        let idx = match bound.or(idle) {
            Some(idx) => idx,
            None if self.handles.len() < self.config.max_size => self.create(Instant::now()),
            None => {
                warn!(
                    "player pool exhausted ({}/{}), no player for '{}'",
                    self.handles.len(),
                    self.config.max_size,
                    stream_id
                );
                return None;
            }
        };

        let handle = &mut self.handles[idx];
        handle.in_use = true;
        handle.bound_stream = Some(stream_id.to_string());
        if handle.url.as_deref() != Some(url) {
            handle.target.load(url, kind);
            handle.url = Some(url.to_string());
        }
        Some(handle.id)
    }

    /// Unbind the player showing `stream_id` and clear its target.
    pub fn release(&mut self, stream_id: &str) -> Option<PlayerId> {
        self.release_at(stream_id, Instant::now())
    }

    pub fn release_at(&mut self, stream_id: &str, now: Instant) -> Option<PlayerId> {
        let idx = self.position_of(stream_id)?;
        let handle = &mut self.handles[idx];
        handle.target.clear();
        handle.bound_stream = None;
        handle.url = None;
        handle.in_use = false;
        handle.last_released_at = now;
        debug!("player {} released by '{}'", handle.id.0, stream_id);
        Some(handle.id)
    }

    /// Release every player bound to a stream `keep` rejects.
    pub fn release_unless<F>(&mut self, keep: F, now: Instant) -> Vec<(String, PlayerId)>
    where
        F: Fn(&str) -> bool,
    {
        let orphaned: Vec<String> = self
            .handles
            .iter()
            .filter_map(|h| h.bound_stream.as_deref())
            .filter(|s| !keep(s))
            .map(str::to_string)
            .collect();
        orphaned
            .into_iter()
            .filter_map(|s| self.release_at(&s, now).map(|id| (s, id)))
            .collect()
    }

    /// Destroy idle handles unused for longer than `max_idle`.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let max_idle = self.config.max_idle;
        let before = self.handles.len();
        self.handles.retain_mut(|h| {
            let expired = !h.in_use && now.saturating_duration_since(h.last_released_at) > max_idle;
            if expired {
                h.target.clear();
            }
            !expired
        });
        let evicted = before - self.handles.len();
        if evicted > 0 {
            info!("evicted {} idle player(s), {} left", evicted, self.handles.len());
        }
        evicted
    }

    /// Destroy every handle.
    pub fn clear(&mut self) {
        for h in &mut self.handles {
            h.target.clear();
        }
        self.handles.clear();
    }

    pub fn stats(&self) -> PoolStats {
        let in_use = self.handles.iter().filter(|h| h.in_use).count();
        PoolStats {
            total: self.handles.len(),
            in_use,
            available: self.handles.len() - in_use,
            max_size: self.config.max_size,
        }
    }

    pub fn player_for(&self, stream_id: &str) -> Option<PlayerId> {
        self.position_of(stream_id).map(|idx| self.handles[idx].id)
    }

    pub fn target(&self, id: PlayerId) -> Option<&T> {
        self.handles.iter().find(|h| h.id == id).map(|h| &h.target)
    }

    fn position_of(&self, stream_id: &str) -> Option<usize> {
        self.handles
            .iter()
            .position(|h| h.bound_stream.as_deref() == Some(stream_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        loads: Vec<String>,
        clears: usize,
    }

    impl RenderTarget for Recording {
        fn load(&mut self, url: &str, _kind: StreamKind) {
            self.loads.push(url.to_string());
        }

        fn clear(&mut self) {
            self.clears += 1;
        }
    }

    fn pool(max_size: usize) -> PlayerPool<Recording> {
        let config = PoolConfig {
            max_size,
            preload: 2,
            sweep_interval: Duration::from_secs(30),
            max_idle: Duration::from_secs(60),
        };
        PlayerPool::new(config, |_| Recording::default())
    }

    #[test]
    fn test_pool_caps_concurrent_players() {
        let mut p = pool(3);
        let got: Vec<_> = (0..5)
            .map(|i| p.acquire(&format!("s{}", i), "https://cdn/x.m3u8", StreamKind::Hls))
            .collect();
        assert_eq!(got.iter().filter(|g| g.is_some()).count(), 3);
        assert!(got[3].is_none() && got[4].is_none());
        let stats = p.stats();
        assert_eq!((stats.total, stats.in_use, stats.available), (3, 3, 0));
    }

    #[test]
    fn test_release_then_sweep_evicts() {
        let mut p = pool(3);
        for i in 0..3 {
            p.acquire(&format!("s{}", i), "u", StreamKind::Other);
        }
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(p.release_at(&format!("s{}", i), t0).is_some());
        }
        assert_eq!(p.stats().available, 3);
        assert_eq!(p.sweep(t0 + Duration::from_secs(30)), 0);
        assert_eq!(p.sweep(t0 + Duration::from_secs(61)), 3);
        let stats = p.stats();
        assert_eq!((stats.total, stats.available), (0, 0));
    }

    #[test]
    fn test_acquire_reuses_bound_handle() {
        let mut p = pool(3);
        let a = p.acquire("s1", "u1", StreamKind::Other).unwrap();
        let again = p.acquire("s1", "u1", StreamKind::Other).unwrap();
        assert_eq!(a, again);
        assert_eq!(p.target(a).unwrap().loads, vec!["u1"]);
        assert_eq!(p.stats().total, 1);
    }

    #[test]
    fn test_released_handle_is_recycled() {
        let mut p = pool(3);
        let a = p.acquire("s1", "u1", StreamKind::Other).unwrap();
        p.release("s1");
        let b = p.acquire("s2", "u2", StreamKind::Other).unwrap();
        assert_eq!(a, b);
        let target = p.target(b).unwrap();
        assert_eq!(target.loads, vec!["u1", "u2"]);
        assert_eq!(target.clears, 1);
        assert_eq!(p.player_for("s2"), Some(b));
        assert!(p.player_for("s1").is_none());
    }

    #[test]
    fn test_preload_and_clear() {
        let mut p = pool(3);
        assert_eq!(p.preload(), 2);
        assert_eq!(p.preload(), 0);
        assert_eq!(p.stats().available, 2);
        p.clear();
        assert_eq!(p.stats().total, 0);
    }

    #[test]
    fn test_release_unless_drops_orphans() {
        let mut p = pool(3);
        p.acquire("keep", "u1", StreamKind::Other);
        let gone = p.acquire("gone", "u2", StreamKind::Other).unwrap();
        let released = p.release_unless(|s| s == "keep", Instant::now());
        assert_eq!(released, vec![("gone".to_string(), gone)]);
        assert_eq!(p.stats().in_use, 1);
    }

    #[test]
    fn test_release_unknown_stream() {
        let mut p = pool(1);
        assert!(p.release("nope").is_none());
    }
}
