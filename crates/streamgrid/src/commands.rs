//! One-shot grid commands run against the saved grids.

use std::fmt::Write as _;

use anyhow::Context;
use tracing::info;

use streamgrid_core::classify;
use streamgrid_core::config::Config;
use streamgrid_core::error::StorageError;
use streamgrid_core::geometry::GridMetrics;
use streamgrid_core::model::{new_id, GridSummary, StreamEntry};
use streamgrid_core::placement;
use streamgrid_core::repository::GridRepository;
use streamgrid_core::storage::DocumentStore;
use streamgrid_core::store::{StreamStore, DEFAULT_GRID_NAME};

/// Find a saved grid by id, or by exact name when the name is unique.
pub async fn resolve_grid<S: DocumentStore>(repo: &GridRepository<S>, key: &str) -> anyhow::Result<GridSummary> {
    let grids = repo.list_grids().await?;
    if let Some(found) = grids.iter().find(|g| g.id == key) {
        return Ok(found.clone());
    }
    let mut named = grids.into_iter().filter(|g| g.name == key);
    match (named.next(), named.next()) {
        (Some(found), None) => Ok(found),
        (Some(_), Some(_)) => anyhow::bail!("more than one grid is named '{}', use its id", key),
        _ => Err(StorageError::GridNotFound(key.to_string()).into()),
    }
}

pub fn format_grid_list(grids: &[GridSummary], current: Option<&str>) -> String {
    if grids.is_empty() {
        return "No saved grids.\n".to_string();
    }
    let mut out = format!("  {:<24}  {:<24}  {:>7}  MODIFIED\n", "ID", "NAME", "STREAMS");
    for g in grids {
        let marker = if current == Some(g.id.as_str()) { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{} {:<24}  {:<24}  {:>7}  {}",
            marker,
            g.id,
            g.name,
            g.stream_count,
            g.last_modified.format("%Y-%m-%d %H:%M")
        );
    }
    out
}

/// Open the current grid for editing, or a fresh one when none is current.
pub async fn open_current<S: DocumentStore>(
    repo: &GridRepository<S>,
    config: &Config,
) -> Result<StreamStore, StorageError> {
    Ok(match repo.current_grid().await? {
        Some(grid) => StreamStore::from_grid(config.layout.clone(), grid),
        None => {
            let mut store = StreamStore::new(config.layout.clone());
            store.new_grid(DEFAULT_GRID_NAME);
            store
        }
    })
}

pub async fn new_grid<S: DocumentStore>(
    repo: &GridRepository<S>,
    config: &Config,
    name: &str,
) -> Result<GridSummary, StorageError> {
    let mut store = StreamStore::new(config.layout.clone());
    store.new_grid(name);
    repo.save_grid(&store.snapshot()).await
}

pub async fn add_stream<S: DocumentStore>(
    repo: &GridRepository<S>,
    config: &Config,
    url: &str,
    name: Option<&str>,
    logo: &str,
) -> anyhow::Result<StreamEntry> {
    let url = url.trim();
    if url.is_empty() {
        anyhow::bail!("stream url is empty");
    }
    let mut store = open_current(repo, config).await?;
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(url);
    let entry = StreamEntry::new(new_id("stream"), name, logo, url);
    if !store.add_stream(entry.clone()) {
        anyhow::bail!("stream {} already exists", entry.id);
    }
    repo.save_grid(&store.snapshot()).await?;
    info!("added {} stream '{}' to '{}'", entry.kind, entry.name, store.grid_name());
    Ok(entry)
}

pub async fn remove_stream<S: DocumentStore>(
    repo: &GridRepository<S>,
    config: &Config,
    key: &str,
) -> anyhow::Result<StreamEntry> {
    let mut store = open_current(repo, config).await?;
    let entry = store
        .streams()
        .iter()
        .find(|s| s.id == key || s.name == key)
        .cloned()
        .with_context(|| format!("no stream '{}' in '{}'", key, store.grid_name()))?;
    store.remove_stream(&entry.id);
    repo.save_grid(&store.snapshot()).await?;
    Ok(entry)
}

/// Compact the current grid. Returns how many items moved.
pub async fn compact<S: DocumentStore>(repo: &GridRepository<S>, config: &Config) -> anyhow::Result<usize> {
    let mut store = open_current(repo, config).await?;
    let before = store.layout().to_vec();
    let after = placement::compact(&before, config.layout.columns);
    let moved = before.iter().zip(&after).filter(|(a, b)| a != b).count();
    if moved > 0 {
        store.update_layout(after);
        repo.save_grid(&store.snapshot()).await?;
    }
    Ok(moved)
}

pub fn describe_url(url: &str, parent_host: &str) -> String {
    let c = classify::classify(url);
    let mut out = format!("{}  {}\n", c.kind, url);
    if let Some(id) = &c.identifier {
        let _ = writeln!(out, "  id:     {}", id);
    }
    for (label, value) in [
        ("page", c.canonical_url()),
        ("embed", c.embed_url(parent_host)),
        ("chat", c.chat_url(parent_host)),
    ] {
        if let Some(value) = value {
            let _ = writeln!(out, "  {:<6}  {}", format!("{}:", label), value);
        }
    }
    if c.kind.needs_transcode() {
        out.push_str("  needs RTSP → HLS transcoding\n");
    }
    out
}

pub fn describe_metrics(m: &GridMetrics) -> String {
    format!(
        "{}×{} px: {} columns of {:.1} px, rows of {} px, {} px margin, {} rows\n",
        m.width, m.height, m.columns, m.column_width, m.row_height, m.margin, m.max_rows
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamgrid_core::storage::MemoryStore;

    fn config() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn test_add_stream_creates_current_grid() {
        let repo = GridRepository::new(MemoryStore::new());
        let cfg = config();
        let entry = add_stream(&repo, &cfg, " https://youtu.be/dQw4w9WgXcQ ", None, "")
            .await
            .unwrap();
        assert_eq!(entry.name, "https://youtu.be/dQw4w9WgXcQ");

        let second = add_stream(&repo, &cfg, "rtsp://cam/live", Some("Cam"), "")
            .await
            .unwrap();
        let grid = repo.current_grid().await.unwrap().unwrap();
        assert_eq!(grid.name, DEFAULT_GRID_NAME);
        assert_eq!(grid.streams.len(), 2);
        assert!(!placement::detect_overlap(&grid.layout));

        let removed = remove_stream(&repo, &cfg, "Cam").await.unwrap();
        assert_eq!(removed.id, second.id);
        assert_eq!(repo.current_grid().await.unwrap().unwrap().layout.len(), 1);
        assert!(remove_stream(&repo, &cfg, "Cam").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_grid_by_id_or_name() {
        let repo = GridRepository::new(MemoryStore::new());
        let cfg = config();
        let a = new_grid(&repo, &cfg, "Sports").await.unwrap();
        new_grid(&repo, &cfg, "News").await.unwrap();
        assert_eq!(resolve_grid(&repo, &a.id).await.unwrap().id, a.id);
        assert_eq!(resolve_grid(&repo, "Sports").await.unwrap().id, a.id);
        assert!(resolve_grid(&repo, "Weather").await.is_err());

        new_grid(&repo, &cfg, "Sports").await.unwrap();
        assert!(resolve_grid(&repo, "Sports").await.is_err());
    }

    #[test]
    fn test_describe_url() {
        let text = describe_url("https://www.twitch.tv/someuser", "localhost");
        assert!(text.starts_with("Twitch"));
        assert!(text.contains("someuser"));
        assert!(describe_url("rtsp://cam/live", "localhost").contains("transcoding"));
    }

    #[test]
    fn test_grid_list_marks_current() {
        let repo_grid = streamgrid_core::model::Grid::new("Main");
        let summary = repo_grid.summary();
        let text = format_grid_list(std::slice::from_ref(&summary), Some(&summary.id));
        assert!(text.lines().nth(1).unwrap().starts_with('*'));
        assert_eq!(format_grid_list(&[], None), "No saved grids.\n");
    }
}
