use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;
use crate::placement::{CellSize, CollisionPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub rtsp: RtspConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Grid geometry and placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_columns")]
    pub columns: u32,
    /// Target width/height ratio of a 1×1 cell.
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: f64,
    /// Container widths below this are treated as this width.
    #[serde(default = "default_min_width_px")]
    pub min_width_px: u32,
    /// Row count the grid must fit vertically.
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
    #[serde(default = "default_margin_px")]
    pub margin_px: u32,
    #[serde(default = "default_vertical_margin_px")]
    pub vertical_margin_px: u32,
    #[serde(default = "default_resize_debounce_ms")]
    pub resize_debounce_ms: u64,
    #[serde(default)]
    pub collision: CollisionPolicy,
    /// New items per row before wrapping to the next row.
    #[serde(default = "default_items_per_row")]
    pub items_per_row: u32,
    #[serde(default = "default_stream_cell")]
    pub stream_cell: CellSize,
    #[serde(default = "default_chat_cell")]
    pub chat_cell: CellSize,
}

/// Player pool sizing and idle eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,
    #[serde(default = "default_pool_preload")]
    pub preload: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

/// Debounce windows and the grids directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_layout_debounce_ms")]
    pub layout_debounce_ms: u64,
    #[serde(default = "default_stream_debounce_ms")]
    pub stream_debounce_ms: u64,
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    #[serde(default = "default_grids_dir")]
    pub grids_dir: PathBuf,
}

/// RTSP → HLS transcoding side-channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtspConfig {
    /// Explicit ffmpeg binary. When unset, `platform::find_ffmpeg_binary` is used.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Host name put into the playlist URLs handed to players.
    #[serde(default = "default_public_host")]
    pub public_host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Time given to ffmpeg to write its first segments.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

/// Optional network enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Look up YouTube titles for streams added without a name.
    #[serde(default = "default_enrich_titles")]
    pub enrich_titles: bool,
    /// `owner/repo` checked for newer releases.
    #[serde(default = "default_update_repo")]
    pub update_repo: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Host passed to Twitch/YouTube embeds as the embedding parent.
    #[serde(default = "default_embed_parent_host")]
    pub embed_parent_host: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            aspect_ratio: default_aspect_ratio(),
            min_width_px: default_min_width_px(),
            max_rows: default_max_rows(),
            margin_px: default_margin_px(),
            vertical_margin_px: default_vertical_margin_px(),
            resize_debounce_ms: default_resize_debounce_ms(),
            collision: CollisionPolicy::default(),
            items_per_row: default_items_per_row(),
            stream_cell: default_stream_cell(),
            chat_cell: default_chat_cell(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            preload: default_pool_preload(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_idle_secs: default_max_idle_secs(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            layout_debounce_ms: default_layout_debounce_ms(),
            stream_debounce_ms: default_stream_debounce_ms(),
            save_debounce_ms: default_save_debounce_ms(),
            grids_dir: default_grids_dir(),
        }
    }
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            bind_address: default_bind_address(),
            public_host: default_public_host(),
            base_port: default_base_port(),
            startup_delay_ms: default_startup_delay_ms(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enrich_titles: default_enrich_titles(),
            update_repo: default_update_repo(),
            request_timeout_secs: default_request_timeout_secs(),
            embed_parent_host: default_embed_parent_host(),
        }
    }
}

impl LayoutConfig {
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

impl PoolSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

impl PersistenceConfig {
    pub fn layout_debounce(&self) -> Duration {
        Duration::from_millis(self.layout_debounce_ms)
    }

    pub fn stream_debounce(&self) -> Duration {
        Duration::from_millis(self.stream_debounce_ms)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

fn default_columns() -> u32 {
    12
}

fn default_aspect_ratio() -> f64 {
    16.0 / 9.0
}

fn default_min_width_px() -> u32 {
    480
}

fn default_max_rows() -> u32 {
    12
}

fn default_margin_px() -> u32 {
    8
}

fn default_vertical_margin_px() -> u32 {
    4
}

fn default_resize_debounce_ms() -> u64 {
    100
}

fn default_items_per_row() -> u32 {
    3
}

fn default_stream_cell() -> CellSize {
    CellSize { w: 3, h: 3 }
}

fn default_chat_cell() -> CellSize {
    CellSize { w: 2, h: 3 }
}

fn default_pool_max_size() -> usize {
    20
}

fn default_pool_preload() -> usize {
    5
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_max_idle_secs() -> u64 {
    60
}

fn default_layout_debounce_ms() -> u64 {
    300
}

fn default_stream_debounce_ms() -> u64 {
    500
}

fn default_save_debounce_ms() -> u64 {
    5000
}

fn default_grids_dir() -> PathBuf {
    platform::grids_dir()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_public_host() -> String {
    "localhost".to_string()
}

fn default_base_port() -> u16 {
    8100
}

fn default_startup_delay_ms() -> u64 {
    2000
}

fn default_enrich_titles() -> bool {
    true
}

fn default_update_repo() -> String {
    "LordKnish/StreamGrid".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_embed_parent_host() -> String {
    "localhost".to_string()
}

impl Config {
    /// Load `config.toml`, writing the defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
