//! GridSession: single-owner event loop for one edited grid.
//!
//! The session owns the store, the mutation coordinator, the player pool and
//! the geometry tracker; nothing else touches them. Inputs arrive as
//! `SessionEvent`s on an mpsc channel, outputs leave as `SessionUpdate`s on
//! a broadcast channel. Between events the loop sleeps until the earliest
//! debounce deadline.
//!
//! Saves run as spawned tasks and report back with `SaveFinished`, so a new
//! edit can land while a write is still in flight. Each write waits for the
//! one started before it, so the newest snapshot is always the last to land.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::classify::StreamKind;
use crate::config::Config;
use crate::coordinator::{MutationCoordinator, PendingSave};
use crate::debounce::earliest;
use crate::error::StorageError;
use crate::geometry::GeometryTracker;
use crate::model::{new_id, LayoutCell, StreamEntry};
use crate::network::NetClient;
use crate::placement;
use crate::pool::{PlayerPool, PoolConfig, VirtualPlayer};
use crate::protocol::{SessionCommand, SessionState, SessionUpdate};
use crate::repository::GridRepository;
use crate::storage::DocumentStore;
use crate::store::{StreamPatch, StreamStore};

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the session loop.
#[derive(Debug)]
pub enum SessionEvent {
    Command(SessionCommand),
    /// A spawned grid write completed.
    SaveFinished {
        revision: u64,
        grid_id: String,
        result: Result<(), String>,
    },
    /// oEmbed lookup for a stream added without a name.
    TitleResolved { stream_id: String, title: String },
    /// Periodic idle-player eviction.
    SweepTick,
    Shutdown,
}

const EVENT_CAPACITY: usize = 256;
const UPDATE_CAPACITY: usize = 256;

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Channels into a running session.
pub struct SessionHandle {
    pub events: mpsc::Sender<SessionEvent>,
    updates: broadcast::Sender<SessionUpdate>,
    pub task: JoinHandle<Result<(), StorageError>>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub async fn send(&self, cmd: SessionCommand) -> bool {
        self.events.send(SessionEvent::Command(cmd)).await.is_ok()
    }

    /// Ask the session to flush and stop, then wait for it.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        let _ = self.events.send(SessionEvent::Shutdown).await;
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!("session task panicked: {}", e);
                Ok(())
            }
        }
    }
}

// ── GridSession ───────────────────────────────────────────────────────────────

pub struct GridSession<S: DocumentStore> {
    config: Config,
    repo: Arc<GridRepository<S>>,
    store: StreamStore,
    coordinator: MutationCoordinator,
    pool: PlayerPool<VirtualPlayer>,
    geometry: GeometryTracker,
    net: Option<NetClient>,
    /// RTSP stream id → HLS playlist served by the transcoder.
    transcoded: HashMap<String, String>,
    /// RTSP streams whose Play is waiting for `TranscodeReady`.
    awaiting_transcode: HashSet<String>,
    /// Most recently started write; later writes chain behind it.
    last_save: Option<JoinHandle<()>>,
    event_tx: mpsc::Sender<SessionEvent>,
    update_tx: broadcast::Sender<SessionUpdate>,
    published_revision: Option<u64>,
}

impl<S: DocumentStore> GridSession<S> {
    /// Open the repository's current grid, or start an empty one.
    pub async fn new(
        config: Config,
        repo: GridRepository<S>,
        event_tx: mpsc::Sender<SessionEvent>,
        update_tx: broadcast::Sender<SessionUpdate>,
    ) -> Result<Self, StorageError> {
        let mut store = StreamStore::new(config.layout.clone());
        if let Some(grid) = repo.current_grid().await? {
            store.load_grid(grid);
        }
        let mut coordinator = MutationCoordinator::new(&config.persistence);
        coordinator.observe(&store, now());

        let pool = PlayerPool::new(PoolConfig::from(&config.pool), |_| VirtualPlayer::default());
        let geometry = GeometryTracker::new(config.layout.clone(), 0.0, 0.0);
        let net = if config.network.enrich_titles {
            match NetClient::new(&config.network) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("title lookups disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            repo: Arc::new(repo),
            store,
            coordinator,
            pool,
            geometry,
            net,
            transcoded: HashMap::new(),
            awaiting_transcode: HashSet::new(),
            last_save: None,
            event_tx,
            update_tx,
            published_revision: None,
        })
    }

    /// Build a session and run it on its own task.
    pub async fn spawn(config: Config, repo: GridRepository<S>) -> Result<SessionHandle, StorageError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (update_tx, _) = broadcast::channel(UPDATE_CAPACITY);
        let session = Self::new(config, repo, event_tx.clone(), update_tx.clone()).await?;
        let task = tokio::spawn(session.run(event_rx));
        Ok(SessionHandle {
            events: event_tx,
            updates: update_tx,
            task,
        })
    }

    pub fn store(&self) -> &StreamStore {
        &self.store
    }

    /// Run until `Shutdown` or until every sender is gone, then flush.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> Result<(), StorageError> {
        info!(
            "session: starting on grid '{}' ({})",
            self.store.grid_name(),
            self.store.grid_id()
        );

        let sweep_tx = self.event_tx.clone();
        let sweep_every = self.pool.config().sweep_interval;
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if sweep_tx.send(SessionEvent::SweepTick).await.is_err() {
                    break;
                }
            }
        });

        self.pool.preload();
        self.publish_state();

        loop {
            let deadline = earliest([self.coordinator.next_deadline(), self.geometry.deadline()]);
            let evt = match deadline {
                Some(at) => {
                    tokio::select! {
                        evt = event_rx.recv() => evt,
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {
                            self.on_timers();
                            continue;
                        }
                    }
                }
                None => event_rx.recv().await,
            };

            match evt {
                None => {
                    info!("session: event channel closed");
                    break;
                }
                Some(SessionEvent::Shutdown) | Some(SessionEvent::Command(SessionCommand::Shutdown)) => {
                    info!("session: shutdown requested");
                    break;
                }
                Some(SessionEvent::Command(cmd)) => {
                    debug!("session: command {:?}", cmd);
                    self.handle_command(cmd).await;
                }
                Some(SessionEvent::SaveFinished {
                    revision,
                    grid_id,
                    result,
                }) => self.on_save_finished(revision, grid_id, result),
                Some(SessionEvent::TitleResolved { stream_id, title }) => {
                    self.on_title(stream_id, title);
                }
                Some(SessionEvent::SweepTick) => {
                    if self.pool.sweep(now()) > 0 {
                        self.emit(SessionUpdate::Pool {
                            stats: self.pool.stats(),
                        });
                    }
                }
            }
            // Timers may be due already after a burst of events
            self.on_timers();
        }

        sweeper.abort();
        self.shutdown().await
    }

    fn emit(&self, update: SessionUpdate) {
        // No receivers is fine: updates are advisory
        let _ = self.update_tx.send(update);
    }

    fn state(&self) -> SessionState {
        SessionState {
            grid_id: self.store.grid_id().to_string(),
            grid_name: self.store.grid_name().to_string(),
            streams: self.store.streams().to_vec(),
            layout: self.store.layout().to_vec(),
            chats: self.store.chats().to_vec(),
            revision: self.store.revision(),
            unsaved: self.store.has_unsaved_changes() || self.coordinator.has_pending_updates(),
            save_status: self.coordinator.status().clone(),
            debounce: self.coordinator.debounce_status(),
            last_dragged: self.store.last_dragged().map(str::to_string),
        }
    }

    fn publish_state(&mut self) {
        self.published_revision = Some(self.store.revision());
        self.emit(SessionUpdate::State { data: self.state() });
    }

    fn publish_if_changed(&mut self) {
        if self.published_revision != Some(self.store.revision()) {
            self.publish_state();
        }
    }

    fn error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("session: {}", message);
        self.emit(SessionUpdate::Error { message });
    }

    // ── Timers and saves ────────────────────────────────────────────────────

    fn on_timers(&mut self) {
        let now = now();
        if let Some(metrics) = self.geometry.poll(now) {
            self.emit(SessionUpdate::Metrics { data: metrics });
        }
        if let Some(pending) = self.coordinator.poll(&mut self.store, now) {
            self.spawn_save(pending);
        }
        self.publish_if_changed();
    }

    fn spawn_save(&mut self, pending: PendingSave) {
        let previous = self.last_save.take().filter(|h| !h.is_finished());
        let repo = Arc::clone(&self.repo);
        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let PendingSave { revision, grid } = pending;
            let result = repo
                .save_grid(&grid)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            let _ = tx
                .send(SessionEvent::SaveFinished {
                    revision,
                    grid_id: grid.id,
                    result,
                })
                .await;
        });
        self.last_save = Some(handle);
    }

    fn on_save_finished(&mut self, revision: u64, grid_id: String, result: Result<(), String>) {
        if grid_id != self.store.grid_id() {
            self.coordinator.abandon_save(revision);
            match result {
                Ok(()) => info!("session: earlier grid {} saved", grid_id),
                Err(e) => error!("session: saving earlier grid {} failed: {}", grid_id, e),
            }
            return;
        }
        let update = match &result {
            Ok(()) => SessionUpdate::Saved {
                revision,
                grid_id: grid_id.clone(),
            },
            Err(message) => SessionUpdate::SaveFailed {
                revision,
                message: message.clone(),
            },
        };
        self.coordinator
            .save_finished(revision, result, &mut self.store, now());
        self.emit(update);
    }

    /// Flush pending edits and write the current grid if anything changed.
    fn save_if_dirty(&mut self) {
        if self.store.has_unsaved_changes() || self.coordinator.has_pending_updates() {
            let pending = self.coordinator.save_now(&mut self.store, None);
            self.spawn_save(pending);
        }
    }

    async fn shutdown(mut self) -> Result<(), StorageError> {
        if let Some(handle) = self.last_save.take() {
            let _ = handle.await;
        }
        self.coordinator.flush(&mut self.store);
        let result = if self.store.has_unsaved_changes() {
            let pending = self.coordinator.save_now(&mut self.store, None);
            match self.repo.save_grid(&pending.grid).await {
                Ok(_) => {
                    self.store.mark_saved(pending.revision);
                    info!("session: flushed rev {} on shutdown", pending.revision);
                    Ok(())
                }
                Err(e) => {
                    error!("session: final save failed: {}", e);
                    Err(e)
                }
            }
        } else {
            Ok(())
        };

        self.pool.clear();
        for stream_id in self.transcoded.drain().map(|(id, _)| id) {
            let _ = self.update_tx.send(SessionUpdate::TranscodeStopped { stream_id });
        }
        info!("session: stopped");
        result
    }

    // ── Commands ────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: SessionCommand) {
        let now = now();
        match cmd {
            SessionCommand::AddStream { url, name, logo_url } => {
                self.coordinator.flush(&mut self.store);
                self.add_stream(url, name, logo_url);
            }
            SessionCommand::RemoveStream { stream_id } => {
                self.stop_stream(&stream_id);
                self.coordinator.flush(&mut self.store);
                if !self.store.remove_stream(&stream_id) {
                    self.error(format!("unknown stream '{}'", stream_id));
                }
            }
            SessionCommand::UpdateStream { stream_id, patch } => {
                if patch.is_empty() {
                    return;
                }
                self.coordinator.update_stream(&stream_id, patch, now);
            }
            SessionCommand::UpdateLayout { layout } => self.coordinator.update_layout(layout, now),
            SessionCommand::MoveItem { item_id, left, top } => {
                let metrics = self.geometry.metrics();
                self.edit_cell(&item_id, now, |cell| {
                    let (x, y) = metrics.cell_at(left, top, cell.w, cell.h);
                    cell.x = x;
                    cell.y = y;
                });
                self.store.set_last_dragged(Some(item_id));
            }
            SessionCommand::ResizeItem {
                item_id,
                width,
                height,
            } => {
                let metrics = self.geometry.metrics();
                self.edit_cell(&item_id, now, |cell| {
                    let (w, h) = metrics.span_for_size(cell.x, width, height);
                    cell.w = w;
                    cell.h = h;
                });
            }
            SessionCommand::SetLastDragged { item_id } => self.store.set_last_dragged(item_id),
            SessionCommand::Compact => {
                self.coordinator.flush(&mut self.store);
                let compacted = placement::compact(self.store.layout(), self.config.layout.columns);
                self.store.update_layout(compacted);
            }
            SessionCommand::Retile => {
                self.coordinator.flush(&mut self.store);
                let tiled = placement::optimal_layout(self.store.layout(), &self.config.layout);
                self.store.update_layout(tiled);
            }
            SessionCommand::AddChat { stream_id } => {
                self.coordinator.flush(&mut self.store);
                if self.store.add_chat(&stream_id).is_none() {
                    self.error(format!("stream '{}' has no chat to show", stream_id));
                }
            }
            SessionCommand::RemoveChat { chat_id } => {
                self.coordinator.flush(&mut self.store);
                if !self.store.remove_chat(&chat_id) {
                    self.error(format!("unknown chat '{}'", chat_id));
                }
            }
            SessionCommand::Resize { width, height } => self.geometry.on_resize(width, height, now),
            SessionCommand::Play { stream_id } => self.play(&stream_id),
            SessionCommand::Stop { stream_id } => self.stop_stream(&stream_id),
            SessionCommand::TranscodeReady { stream_id, hls_url } => {
                info!("session: transcode ready for {} at {}", stream_id, hls_url);
                self.transcoded.insert(stream_id.clone(), hls_url.clone());
                if self.awaiting_transcode.remove(&stream_id) {
                    self.assign_player(&stream_id, &hls_url, StreamKind::Hls);
                }
            }
            SessionCommand::TranscodeFailed { stream_id, message } => {
                self.awaiting_transcode.remove(&stream_id);
                self.error(format!("transcoding '{}' failed: {}", stream_id, message));
            }
            SessionCommand::Import { data } => {
                self.coordinator.cancel_pending();
                let report = self.store.import_value(&data);
                if report.success {
                    self.release_missing_players();
                }
                self.emit(SessionUpdate::ImportResult { report });
            }
            SessionCommand::Export => {
                self.coordinator.flush(&mut self.store);
                self.emit(SessionUpdate::Exported {
                    data: self.store.export(),
                });
            }
            SessionCommand::LoadGrid { grid_id } => self.load_grid(&grid_id).await,
            SessionCommand::NewGrid { name } => {
                self.save_if_dirty();
                self.stop_all();
                let id = self.store.new_grid(&name);
                info!("session: new grid '{}' ({})", self.store.grid_name(), id);
            }
            SessionCommand::Save { name } => {
                let pending = self.coordinator.save_now(&mut self.store, name.as_deref());
                self.spawn_save(pending);
            }
            SessionCommand::GetState => self.publish_state(),
            SessionCommand::PoolStats => self.emit(SessionUpdate::Pool {
                stats: self.pool.stats(),
            }),
            // handled by the loop
            SessionCommand::Shutdown => {}
        }
        self.coordinator.observe(&self.store, now);
        self.publish_if_changed();
    }

    fn add_stream(&mut self, url: String, name: String, logo_url: String) {
        let url = url.trim().to_string();
        if url.is_empty() {
            self.error("stream url is empty");
            return;
        }
        let unnamed = name.trim().is_empty();
        let display_name = if unnamed { url.clone() } else { name.trim().to_string() };
        let entry = StreamEntry::new(new_id("stream"), display_name, logo_url, url.clone());
        let stream_id = entry.id.clone();
        let kind = entry.kind;
        if !self.store.add_stream(entry) {
            return;
        }
        if unnamed && kind == StreamKind::YouTube {
            self.lookup_title(stream_id, url);
        }
    }

    fn lookup_title(&self, stream_id: String, url: String) {
        let Some(net) = self.net.clone() else {
            return;
        };
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            match net.youtube_title(&url).await {
                Ok(title) => {
                    let _ = tx.send(SessionEvent::TitleResolved { stream_id, title }).await;
                }
                Err(e) => debug!("title lookup for {} failed: {}", url, e),
            }
        });
    }

    fn on_title(&mut self, stream_id: String, title: String) {
        // Only replace the placeholder; a user rename wins
        let still_placeholder = self
            .store
            .stream(&stream_id)
            .is_some_and(|s| s.name == s.stream_url);
        if still_placeholder {
            self.coordinator
                .update_stream(&stream_id, StreamPatch::name(title), now());
        }
    }

    fn edit_cell<F>(&mut self, item_id: &str, now: Instant, edit: F)
    where
        F: FnOnce(&mut LayoutCell),
    {
        let mut layout: Vec<LayoutCell> = self
            .coordinator
            .pending_layout()
            .unwrap_or(self.store.layout())
            .to_vec();
        let Some(cell) = layout.iter_mut().find(|c| c.item_id == item_id) else {
            self.error(format!("unknown grid item '{}'", item_id));
            return;
        };
        edit(cell);
        self.coordinator.update_layout(layout, now);
    }

    // ── Playback ────────────────────────────────────────────────────────────

    fn play(&mut self, stream_id: &str) {
        let Some(stream) = self.store.stream(stream_id) else {
            self.error(format!("unknown stream '{}'", stream_id));
            return;
        };
        let (url, kind) = (stream.stream_url.clone(), stream.kind);
        if !kind.needs_transcode() {
            self.assign_player(stream_id, &url, kind);
            return;
        }
        if let Some(hls_url) = self.transcoded.get(stream_id).cloned() {
            self.assign_player(stream_id, &hls_url, StreamKind::Hls);
            return;
        }
        if self.awaiting_transcode.insert(stream_id.to_string()) {
            self.emit(SessionUpdate::TranscodeRequested {
                stream_id: stream_id.to_string(),
                url,
            });
        }
    }

    fn assign_player(&mut self, stream_id: &str, url: &str, kind: StreamKind) {
        let update = match self.pool.acquire(stream_id, url, kind) {
            Some(player_id) => SessionUpdate::PlayerAssigned {
                stream_id: stream_id.to_string(),
                player_id,
                url: url.to_string(),
                kind,
            },
            None => SessionUpdate::PlayerUnavailable {
                stream_id: stream_id.to_string(),
            },
        };
        self.emit(update);
    }

    fn stop_stream(&mut self, stream_id: &str) {
        if let Some(player_id) = self.pool.release_at(stream_id, now()) {
            self.emit(SessionUpdate::PlayerReleased {
                stream_id: stream_id.to_string(),
                player_id,
            });
        }
        let was_waiting = self.awaiting_transcode.remove(stream_id);
        if self.transcoded.remove(stream_id).is_some() || was_waiting {
            self.emit(SessionUpdate::TranscodeStopped {
                stream_id: stream_id.to_string(),
            });
        }
    }

    fn stop_all(&mut self) {
        let ids: Vec<String> = self.store.streams().iter().map(|s| s.id.clone()).collect();
        for id in ids {
            self.stop_stream(&id);
        }
    }

    fn release_missing_players(&mut self) {
        let live: HashSet<String> = self.store.streams().iter().map(|s| s.id.clone()).collect();
        let stale: Vec<String> = self
            .transcoded
            .keys()
            .chain(self.awaiting_transcode.iter())
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.stop_stream(&id);
        }
        for (stream_id, player_id) in self.pool.release_unless(|s| live.contains(s), now()) {
            self.emit(SessionUpdate::PlayerReleased { stream_id, player_id });
        }
    }

    async fn load_grid(&mut self, grid_id: &str) {
        if grid_id == self.store.grid_id() {
            self.publish_state();
            return;
        }
        let grid = match self.repo.load_grid(grid_id).await {
            Ok(grid) => grid,
            Err(e) => {
                self.error(format!("cannot load grid {}: {}", grid_id, e));
                return;
            }
        };
        self.save_if_dirty();
        self.stop_all();
        self.coordinator.cancel_pending();
        self.store.load_grid(grid);
        if let Err(e) = self.repo.set_current(Some(grid_id)).await {
            warn!("session: could not mark {} current: {}", grid_id, e);
        }
    }
}
