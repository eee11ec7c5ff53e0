//! The remote catalog boundary, plus an in-process catalog backed by a JSON
//! document.

use crate::core::asset::{Album, AssetError, LocalAsset, RemoteAsset};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot read local file: {0}")]
    Local(#[from] AssetError),

    #[error("File task failed: {0}")]
    Task(#[from] JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    /// The catalog already had this content and kept its own copy.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Every asset, trashed ones included.
    async fn all_assets(&self) -> Result<Vec<RemoteAsset>, CatalogError>;

    async fn all_albums(&self) -> Result<Vec<AlbumSummary>, CatalogError>;

    async fn upload(&self, asset: &LocalAsset) -> Result<UploadResponse, CatalogError>;

    /// Without `force` the assets go to the trash.
    async fn delete(&self, ids: &[String], force: bool) -> Result<(), CatalogError>;

    async fn create_album(
        &self,
        title: &str,
        description: &str,
        ids: &[String],
    ) -> Result<AlbumSummary, CatalogError>;

    async fn add_to_album(&self, album_id: &str, ids: &[String]) -> Result<(), CatalogError>;

    async fn stack(&self, cover_id: &str, ids: &[String]) -> Result<(), CatalogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upload,
    Delete,
    CreateAlbum,
    AddToAlbum,
    Stack,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Delete => "delete",
            Operation::CreateAlbum => "create album",
            Operation::AddToAlbum => "add to album",
            Operation::Stack => "stack",
        }
    }
}

/// A mutating call received by [`MemoryCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCall {
    pub operation: Operation,
    /// File name, album title, cover id or asset id, depending on the call.
    pub subject: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredAlbum {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub asset_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredStack {
    pub cover_id: String,
    pub ids: Vec<String>,
}

/// The JSON document a [`MemoryCatalog`] reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogState {
    pub assets: Vec<RemoteAsset>,
    pub albums: Vec<StoredAlbum>,
    pub stacks: Vec<StoredStack>,
}

#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
    failures: Mutex<HashSet<(Operation, String)>>,
    calls: Mutex<Vec<CatalogCall>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryCatalog {
    pub fn new(state: CatalogState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Default::default()
        }
    }

    /// A missing file is an empty catalog.
    pub fn from_json(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            log::info!("{} does not exist, starting with an empty catalog", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(Self::new(serde_json::from_str(&content)?))
    }

    pub fn save_json(&self, path: &Path) -> Result<(), CatalogError> {
        let content = serde_json::to_string_pretty(&*locked(&self.state))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Make `operation` fail for `subject`, or for everything with `"*"`.
    pub fn fail(&self, operation: Operation, subject: impl Into<String>) {
        locked(&self.failures).insert((operation, subject.into()));
    }

    pub fn calls(&self) -> Vec<CatalogCall> {
        locked(&self.calls).clone()
    }

    pub fn state(&self) -> CatalogState {
        locked(&self.state).clone()
    }

    fn call(&self, operation: Operation, subject: &str) -> Result<(), CatalogError> {
        locked(&self.calls).push(CatalogCall {
            operation,
            subject: subject.to_string(),
        });

        let failures = locked(&self.failures);
        if failures.contains(&(operation, subject.to_string()))
            || failures.contains(&(operation, "*".to_string()))
        {
            return Err(CatalogError::Request {
                operation: operation.label(),
                message: format!("injected failure for {subject}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn all_assets(&self) -> Result<Vec<RemoteAsset>, CatalogError> {
        let state = locked(&self.state);
        let assets = state
            .assets
            .iter()
            .map(|asset| {
                let mut asset = asset.clone();
                asset.albums = state
                    .albums
                    .iter()
                    .filter(|album| album.asset_ids.contains(&asset.id))
                    .map(|album| Album {
                        title: album.title.clone(),
                        description: album.description.clone(),
                    })
                    .collect();
                asset
            })
            .collect();
        Ok(assets)
    }

    async fn all_albums(&self) -> Result<Vec<AlbumSummary>, CatalogError> {
        Ok(locked(&self.state)
            .albums
            .iter()
            .map(|album| AlbumSummary {
                id: album.id.clone(),
                title: album.title.clone(),
                description: album.description.clone(),
            })
            .collect())
    }

    async fn upload(&self, asset: &LocalAsset) -> Result<UploadResponse, CatalogError> {
        self.call(Operation::Upload, &asset.file_name)?;
        let local = asset.clone();
        let (metadata, checksum) = tokio::task::spawn_blocking(move || {
            Ok::<_, AssetError>((local.probe()?, local.checksum()?))
        })
        .await??;

        let mut state = locked(&self.state);
        if let Some(existing) = state
            .assets
            .iter()
            .find(|a| !a.is_trashed && a.checksum.as_deref() == Some(checksum.as_str()))
        {
            return Ok(UploadResponse {
                id: existing.id.clone(),
                duplicate: true,
            });
        }

        let id = Uuid::new_v4().to_string();
        state.assets.push(RemoteAsset {
            id: id.clone(),
            original_file_name: asset.file_name.clone(),
            taken: asset.taken,
            is_trashed: false,
            size: metadata.size,
            width: metadata.width,
            height: metadata.height,
            checksum: Some(checksum),
            ..Default::default()
        });
        Ok(UploadResponse {
            id,
            duplicate: false,
        })
    }

    async fn delete(&self, ids: &[String], force: bool) -> Result<(), CatalogError> {
        for id in ids {
            self.call(Operation::Delete, id)?;
        }

        let mut state = locked(&self.state);
        if force {
            state.assets.retain(|a| !ids.contains(&a.id));
            for album in &mut state.albums {
                album.asset_ids.retain(|id| !ids.contains(id));
            }
        } else {
            for asset in state.assets.iter_mut().filter(|a| ids.contains(&a.id)) {
                asset.is_trashed = true;
            }
        }
        Ok(())
    }

    async fn create_album(
        &self,
        title: &str,
        description: &str,
        ids: &[String],
    ) -> Result<AlbumSummary, CatalogError> {
        self.call(Operation::CreateAlbum, title)?;

        let album = StoredAlbum {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            asset_ids: ids.to_vec(),
        };
        let summary = AlbumSummary {
            id: album.id.clone(),
            title: album.title.clone(),
            description: album.description.clone(),
        };
        locked(&self.state).albums.push(album);
        Ok(summary)
    }

    async fn add_to_album(&self, album_id: &str, ids: &[String]) -> Result<(), CatalogError> {
        let mut state = locked(&self.state);
        let album = state
            .albums
            .iter_mut()
            .find(|a| a.id == album_id)
            .ok_or_else(|| CatalogError::NotFound(format!("album {album_id}")))?;
        self.call(Operation::AddToAlbum, &album.title)?;

        for id in ids {
            if !album.asset_ids.contains(id) {
                album.asset_ids.push(id.clone());
            }
        }
        Ok(())
    }

    async fn stack(&self, cover_id: &str, ids: &[String]) -> Result<(), CatalogError> {
        self.call(Operation::Stack, cover_id)?;

        let mut state = locked(&self.state);
        if let Some(missing) = ids.iter().find(|id| !state.assets.iter().any(|a| &a.id == *id)) {
            return Err(CatalogError::NotFound(format!("asset {missing}")));
        }
        state.stacks.push(StoredStack {
            cover_id: cover_id.to_string(),
            ids: ids.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::SupportedMedia;
    use crate::core::names::Recognizer;
    use chrono::FixedOffset;
    use tempfile::TempDir;

    fn recognizer() -> Recognizer {
        Recognizer::new(FixedOffset::east_opt(0).unwrap(), SupportedMedia::new())
    }

    #[tokio::test]
    async fn test_upload_and_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("a.jpg");
        let copy = temp_dir.path().join("b.jpg");
        fs::write(&first, b"picture").unwrap();
        fs::write(&copy, b"picture").unwrap();
        let catalog = MemoryCatalog::default();

        let uploaded = catalog.upload(&LocalAsset::new(&first, &recognizer())).await.unwrap();
        let again = catalog.upload(&LocalAsset::new(&copy, &recognizer())).await.unwrap();

        assert!(!uploaded.duplicate);
        assert!(again.duplicate);
        assert_eq!(again.id, uploaded.id);

        let assets = catalog.all_assets().await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].original_file_name, "a.jpg");
        assert_eq!(assets[0].size, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_uploads_and_unreadable_file() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = MemoryCatalog::default();
        let assets: Vec<LocalAsset> = (0..6)
            .map(|i| {
                let path = temp_dir.path().join(format!("IMG_{i}.jpg"));
                fs::write(&path, vec![i as u8; 256 * 1024]).unwrap();
                LocalAsset::new(path, &recognizer())
            })
            .collect();

        let results =
            futures::future::join_all(assets.iter().map(|asset| catalog.upload(asset))).await;
        assert!(results.iter().all(|r| matches!(r, Ok(r) if !r.duplicate)));
        assert_eq!(catalog.state().assets.len(), 6);

        let missing = LocalAsset::new(temp_dir.path().join("gone.jpg"), &recognizer());
        assert!(matches!(
            catalog.upload(&missing).await,
            Err(CatalogError::Local(_))
        ));
        assert_eq!(catalog.state().assets.len(), 6);
    }

    #[tokio::test]
    async fn test_albums_show_on_assets() {
        let catalog = MemoryCatalog::new(CatalogState {
            assets: vec![RemoteAsset::new("1", "a.jpg"), RemoteAsset::new("2", "b.jpg")],
            ..Default::default()
        });

        let album = catalog
            .create_album("Trip", "summer", &["1".to_string()])
            .await
            .unwrap();
        catalog.add_to_album(&album.id, &["2".to_string(), "1".to_string()]).await.unwrap();

        let assets = catalog.all_assets().await.unwrap();
        assert!(assets.iter().all(|a| a.albums == vec![Album {
            title: "Trip".to_string(),
            description: "summer".to_string(),
        }]));
        assert_eq!(catalog.state().albums[0].asset_ids, vec!["1", "2"]);
        assert!(matches!(
            catalog.add_to_album("nope", &[]).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_trash_and_force() {
        let catalog = MemoryCatalog::new(CatalogState {
            assets: vec![RemoteAsset::new("1", "a.jpg"), RemoteAsset::new("2", "b.jpg")],
            ..Default::default()
        });

        catalog.delete(&["1".to_string()], false).await.unwrap();
        catalog.delete(&["2".to_string()], true).await.unwrap();

        let assets = catalog.all_assets().await.unwrap();
        assert_eq!(assets.len(), 1);
        assert!(assets[0].is_trashed);
    }

    #[tokio::test]
    async fn test_injected_failures_and_calls() {
        let catalog = MemoryCatalog::new(CatalogState {
            assets: vec![RemoteAsset::new("1", "a.jpg"), RemoteAsset::new("2", "b.jpg")],
            ..Default::default()
        });
        catalog.fail(Operation::CreateAlbum, "Broken");
        catalog.fail(Operation::Stack, "*");

        assert!(catalog.create_album("Broken", "", &[]).await.is_err());
        assert!(catalog.create_album("Fine", "", &[]).await.is_ok());
        assert!(matches!(
            catalog.stack("1", &["1".to_string(), "2".to_string()]).await,
            Err(CatalogError::Request { operation: "stack", .. })
        ));

        let calls = catalog.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].operation, Operation::CreateAlbum);
        assert_eq!(calls[1].subject, "Fine");
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.json");

        let missing = MemoryCatalog::from_json(&path).unwrap();
        assert!(missing.all_assets().await.unwrap().is_empty());

        fs::write(
            &path,
            r#"{"assets":[{"id":"1","original_file_name":"IMG_003.jpg","size":10}]}"#,
        )
        .unwrap();
        let catalog = MemoryCatalog::from_json(&path).unwrap();
        catalog.stack("1", &["1".to_string()]).await.unwrap();
        catalog.save_json(&path).unwrap();

        let reloaded = MemoryCatalog::from_json(&path).unwrap();
        assert_eq!(reloaded.state().stacks.len(), 1);
        assert_eq!(reloaded.state().assets[0].size, 10);
    }
}
