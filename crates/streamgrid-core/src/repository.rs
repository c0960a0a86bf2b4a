//! Saved grids: one document per grid plus a manifest indexing them.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{ImportError, StorageError};
use crate::exchange;
use crate::model::{grid_file_name, ExchangeData, Grid, GridManifest, GridSummary};
use crate::storage::DocumentStore;

pub const MANIFEST_KEY: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct GridRepository<S> {
    store: S,
}

fn parse<T: serde::de::DeserializeOwned>(key: &str, text: &str) -> Result<T, StorageError> {
    serde_json::from_str(text).map_err(|source| StorageError::Json {
        path: key.to_string(),
        source,
    })
}

fn render<T: serde::Serialize>(key: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string_pretty(value).map_err(|source| StorageError::Json {
        path: key.to_string(),
        source,
    })
}

impl<S: DocumentStore> GridRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The manifest, or an empty one when none was written yet.
    pub async fn manifest(&self) -> Result<GridManifest, StorageError> {
        match self.store.read(MANIFEST_KEY).await? {
            Some(text) => parse(MANIFEST_KEY, &text),
            None => Ok(GridManifest::default()),
        }
    }

    async fn write_manifest(&self, manifest: &GridManifest) -> Result<(), StorageError> {
        let text = render(MANIFEST_KEY, manifest)?;
        self.store.write(MANIFEST_KEY, text).await
    }

    /// Saved grids, most recently modified first.
    pub async fn list_grids(&self) -> Result<Vec<GridSummary>, StorageError> {
        let mut grids = self.manifest().await?.grids;
        grids.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(grids)
    }

    pub async fn load_grid(&self, id: &str) -> Result<Grid, StorageError> {
        let key = grid_file_name(id);
        let text = self
            .store
            .read(&key)
            .await?
            .ok_or_else(|| StorageError::GridNotFound(id.to_string()))?;
        parse(&key, &text)
    }

    /// Write the grid document, then upsert its manifest entry and make it
    /// the current grid.
    pub async fn save_grid(&self, grid: &Grid) -> Result<GridSummary, StorageError> {
        let key = grid.file_name();
        self.store.write(&key, render(&key, grid)?).await?;

        let summary = grid.summary();
        let mut manifest = self.manifest().await?;
        manifest.upsert(summary.clone());
        manifest.current_grid_id = Some(grid.id.clone());
        self.write_manifest(&manifest).await?;
        info!("saved grid '{}' ({} streams)", grid.name, grid.streams.len());
        Ok(summary)
    }

    /// Remove a grid. Clears the current grid when it was this one.
    pub async fn delete_grid(&self, id: &str) -> Result<(), StorageError> {
        let mut manifest = self.manifest().await?;
        let in_manifest = manifest.remove(id).is_some();
        let removed = self.store.remove(&grid_file_name(id)).await?;
        if !in_manifest && !removed {
            return Err(StorageError::GridNotFound(id.to_string()));
        }
        if !removed {
            warn!("grid {} had no document on disk", id);
        }
        self.write_manifest(&manifest).await?;
        info!("deleted grid {}", id);
        Ok(())
    }

    pub async fn rename_grid(&self, id: &str, name: &str) -> Result<GridSummary, StorageError> {
        let mut grid = self.load_grid(id).await?;
        let name = name.trim();
        if name.is_empty() {
            warn!("rename_grid: empty name for {}, keeping '{}'", id, grid.name);
            return Ok(grid.summary());
        }
        grid.name = name.to_string();
        grid.last_modified = Utc::now();
        self.write_grid_keep_current(&grid).await
    }

    /// Copy a grid under a new id. The copy does not become current.
    pub async fn duplicate_grid(&self, id: &str, name: &str) -> Result<Grid, StorageError> {
        let source = self.load_grid(id).await?;
        let name = match name.trim() {
            "" => source.name.as_str(),
            trimmed => trimmed,
        };
        let mut copy = Grid::new(name);
        copy.thumbnail = source.thumbnail;
        copy.streams = source.streams;
        copy.layout = source.layout;
        copy.chats = source.chats;
        self.write_grid_keep_current(&copy).await?;
        Ok(copy)
    }

    async fn write_grid_keep_current(&self, grid: &Grid) -> Result<GridSummary, StorageError> {
        let key = grid.file_name();
        self.store.write(&key, render(&key, grid)?).await?;
        let summary = grid.summary();
        let mut manifest = self.manifest().await?;
        manifest.upsert(summary.clone());
        self.write_manifest(&manifest).await?;
        Ok(summary)
    }

    pub async fn set_current(&self, id: Option<&str>) -> Result<(), StorageError> {
        let mut manifest = self.manifest().await?;
        if let Some(id) = id {
            if manifest.get(id).is_none() {
                return Err(StorageError::GridNotFound(id.to_string()));
            }
        }
        manifest.current_grid_id = id.map(str::to_string);
        self.write_manifest(&manifest).await
    }

    /// The current grid, if one is set and still loadable.
    pub async fn current_grid(&self) -> Result<Option<Grid>, StorageError> {
        let Some(id) = self.manifest().await?.current_grid_id else {
            return Ok(None);
        };
        match self.load_grid(&id).await {
            Ok(grid) => Ok(Some(grid)),
            Err(StorageError::GridNotFound(_)) => {
                warn!("current grid {} is missing", id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn export_grid(&self, id: &str) -> Result<ExchangeData, StorageError> {
        Ok(self.load_grid(id).await?.to_exchange())
    }

    /// Create and save a new grid from an exchange document.
    pub async fn import_grid(&self, name: &str, text: &str) -> Result<Result<Grid, ImportError>, StorageError> {
        let data = match exchange::parse(text) {
            Ok(data) => data,
            Err(e) => return Ok(Err(e)),
        };
        let mut grid = Grid::new(name.trim());
        grid.streams = data.streams;
        grid.layout = data.layout;
        grid.chats = data.chats;
        self.write_grid_keep_current(&grid).await?;
        Ok(Ok(grid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LayoutCell, StreamEntry};
    use crate::storage::MemoryStore;

    fn sample(name: &str) -> Grid {
        let mut grid = Grid::new(name);
        grid.streams
            .push(StreamEntry::new("s1", "Lofi", "logo", "https://twitch.tv/lofigirl"));
        grid.layout.push(LayoutCell::new("s1", 0, 0, 3, 3));
        grid
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let repo = GridRepository::new(MemoryStore::new());
        let grid = sample("Main");
        let summary = repo.save_grid(&grid).await.unwrap();
        assert_eq!(summary.stream_count, 1);
        assert_eq!(summary.file_name, format!("grid-{}.json", grid.id));
        assert_eq!(repo.load_grid(&grid.id).await.unwrap(), grid);
        assert_eq!(repo.current_grid().await.unwrap(), Some(grid));
    }

    #[tokio::test]
    async fn test_missing_grid() {
        let repo = GridRepository::new(MemoryStore::new());
        assert!(matches!(
            repo.load_grid("nope").await,
            Err(StorageError::GridNotFound(_))
        ));
        assert!(repo.delete_grid("nope").await.is_err());
        assert!(repo.current_grid().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_clears_current() {
        let repo = GridRepository::new(MemoryStore::new());
        let a = sample("A");
        let b = sample("B");
        repo.save_grid(&a).await.unwrap();
        repo.save_grid(&b).await.unwrap();
        repo.delete_grid(&b.id).await.unwrap();
        let manifest = repo.manifest().await.unwrap();
        assert!(manifest.current_grid_id.is_none());
        assert_eq!(manifest.grids.len(), 1);
        assert_eq!(repo.store().keys(), vec![a.file_name(), MANIFEST_KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_rename_and_duplicate() {
        let repo = GridRepository::new(MemoryStore::new());
        let grid = sample("Old");
        repo.save_grid(&grid).await.unwrap();

        let renamed = repo.rename_grid(&grid.id, " New ").await.unwrap();
        assert_eq!(renamed.name, "New");
        let kept = repo.rename_grid(&grid.id, "   ").await.unwrap();
        assert_eq!(kept.name, "New");
        assert_eq!(repo.load_grid(&grid.id).await.unwrap().name, "New");

        let copy = repo.duplicate_grid(&grid.id, "Copy").await.unwrap();
        assert_ne!(copy.id, grid.id);
        assert_eq!(copy.streams, grid.streams);

        let manifest = repo.manifest().await.unwrap();
        assert_eq!(manifest.grids.len(), 2);
        assert_eq!(manifest.current_grid_id.as_deref(), Some(grid.id.as_str()));
        assert_eq!(manifest.get(&grid.id).unwrap().name, "New");
    }

    #[tokio::test]
    async fn test_set_current_requires_known_grid() {
        let repo = GridRepository::new(MemoryStore::new());
        assert!(repo.set_current(Some("ghost")).await.is_err());
        repo.set_current(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_import_grid_reports_validation() {
        let repo = GridRepository::new(MemoryStore::new());
        let rejected = repo.import_grid("Bad", r#"{"streams": 3}"#).await.unwrap();
        assert_eq!(rejected.unwrap_err(), ImportError::NotArrays);

        let exported = serde_json::to_string(&sample("Src").to_exchange()).unwrap();
        let grid = repo.import_grid("Imported", &exported).await.unwrap().unwrap();
        assert_eq!(repo.export_grid(&grid.id).await.unwrap(), grid.to_exchange());
    }

    #[tokio::test]
    async fn test_failed_write_propagates() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let repo = GridRepository::new(store);
        assert!(matches!(
            repo.save_grid(&sample("X")).await,
            Err(StorageError::Io { .. })
        ));
    }
}
