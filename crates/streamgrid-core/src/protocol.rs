use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::StreamKind;
use crate::coordinator::{DebounceStatus, SaveStatus};
use crate::exchange::ImportReport;
use crate::geometry::GridMetrics;
use crate::model::{ChatOverlay, ExchangeData, LayoutCell, StreamEntry};
use crate::pool::{PlayerId, PoolStats};
use crate::store::StreamPatch;

/// Messages sent from the host UI to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum SessionCommand {
    AddStream {
        url: String,
        /// Empty names are filled from the URL (and looked up for YouTube).
        #[serde(default)]
        name: String,
        #[serde(default)]
        logo_url: String,
    },
    RemoveStream { stream_id: String },
    UpdateStream { stream_id: String, patch: StreamPatch },
    UpdateLayout { layout: Vec<LayoutCell> },
    /// Item dropped at a pixel position inside the grid container.
    MoveItem { item_id: String, left: f64, top: f64 },
    /// Item resized to a pixel size.
    ResizeItem { item_id: String, width: f64, height: f64 },
    SetLastDragged { item_id: Option<String> },
    Compact,
    Retile,
    AddChat { stream_id: String },
    RemoveChat { chat_id: String },
    /// Grid container resized.
    Resize { width: f64, height: f64 },
    Play { stream_id: String },
    Stop { stream_id: String },
    TranscodeReady { stream_id: String, hls_url: String },
    TranscodeFailed { stream_id: String, message: String },
    Import { data: Value },
    Export,
    LoadGrid { grid_id: String },
    NewGrid { name: String },
    Save { name: Option<String> },
    GetState,
    PoolStats,
    Shutdown,
}

/// Messages sent from a session to the host UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "update")]
pub enum SessionUpdate {
    State { data: SessionState },
    Metrics { data: GridMetrics },
    Saved { revision: u64, grid_id: String },
    SaveFailed { revision: u64, message: String },
    PlayerAssigned {
        stream_id: String,
        player_id: PlayerId,
        url: String,
        kind: StreamKind,
    },
    PlayerReleased { stream_id: String, player_id: PlayerId },
    PlayerUnavailable { stream_id: String },
    TranscodeRequested { stream_id: String, url: String },
    TranscodeStopped { stream_id: String },
    ImportResult { report: ImportReport },
    Exported { data: ExchangeData },
    Pool { stats: PoolStats },
    Error { message: String },
}

/// Snapshot of the grid being edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub grid_id: String,
    pub grid_name: String,
    pub streams: Vec<StreamEntry>,
    pub layout: Vec<LayoutCell>,
    pub chats: Vec<ChatOverlay>,
    pub revision: u64,
    pub unsaved: bool,
    pub save_status: SaveStatus,
    pub debounce: DebounceStatus,
    pub last_dragged: Option<String>,
}
