//! Handling of completed groups: upload or skip each member, then apply
//! albums and stacking on the catalog.

use crate::config::UploadConfig;
use crate::core::asset::{Album, LocalAsset, RemoteAsset};
use crate::core::group::{AssetGroup, GroupingKind};
use crate::core::index::{Advice, AdviceError, AssetIndex, UploadAdvice};
use crate::services::catalog::{AlbumSummary, CatalogClient, CatalogError};
use crate::services::journal::{FileEvent, Journal};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Cannot advise {file}: {source}")]
    Advice {
        file: String,
        #[source]
        source: AdviceError,
    },

    #[error("File task for {file} failed: {source}")]
    Task {
        file: String,
        #[source]
        source: JoinError,
    },

    #[error("Upload of {file} failed: {source}")]
    Upload {
        file: String,
        #[source]
        source: CatalogError,
    },

    #[error("Deleting server asset {id} failed: {source}")]
    Delete {
        id: String,
        #[source]
        source: CatalogError,
    },

    #[error("Album '{title}' update failed: {source}")]
    Album {
        title: String,
        #[source]
        source: CatalogError,
    },

    #[error("Stacking under {cover} failed: {source}")]
    Stack {
        cover: String,
        #[source]
        source: CatalogError,
    },
}

/// Everything that went wrong while handling one group.
#[derive(Debug, Error)]
#[error("{} operation(s) failed for the group", .errors.len())]
pub struct GroupFailures {
    pub errors: Vec<DispatchError>,
}

/// Which group kinds get stacked on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackPolicy {
    pub bursts: bool,
    pub raw_jpg: bool,
    pub heic_jpg: bool,
}

impl StackPolicy {
    pub fn allows(&self, kind: GroupingKind) -> bool {
        match kind {
            GroupingKind::None => false,
            GroupingKind::Burst => self.bursts,
            GroupingKind::RawJpg => self.raw_jpg,
            GroupingKind::HeicJpg => self.heic_jpg,
        }
    }
}

impl From<&UploadConfig> for StackPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            bursts: config.stack_bursts,
            raw_jpg: config.stack_raw_jpg,
            heic_jpg: config.stack_heic_jpg,
        }
    }
}

type AlbumSlot = Arc<tokio::sync::Mutex<Option<String>>>;

/// Album ids by title. Each title has its own lock, held for the whole
/// create-or-append call.
#[derive(Default)]
pub struct AlbumRegistry {
    slots: Mutex<HashMap<String, AlbumSlot>>,
}

impl AlbumRegistry {
    pub fn new(existing: Vec<AlbumSummary>) -> Self {
        let slots = existing
            .into_iter()
            .map(|album| (album.title, Arc::new(tokio::sync::Mutex::new(Some(album.id)))))
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    fn slot(&self, title: &str) -> AlbumSlot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(title.to_string()).or_default())
    }

    pub async fn album_id(&self, title: &str) -> Option<String> {
        self.slot(title).lock().await.clone()
    }

    /// Append `ids` to the album, creating it on first use.
    pub async fn add_assets(
        &self,
        catalog: &dyn CatalogClient,
        album: &Album,
        ids: &[String],
    ) -> Result<(), CatalogError> {
        let slot = self.slot(&album.title);
        let mut album_id = slot.lock().await;

        match album_id.as_deref() {
            Some(id) => catalog.add_to_album(id, ids).await,
            None => {
                let created = catalog
                    .create_album(&album.title, &album.description, ids)
                    .await?;
                log::info!("Created album '{}'", album.title);
                *album_id = Some(created.id);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub concurrency: usize,
    pub delete_superseded: bool,
    pub stack: StackPolicy,
}

impl From<&UploadConfig> for DispatchOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            delete_superseded: config.delete_superseded,
            stack: StackPolicy::from(config),
        }
    }
}

struct MemberOutcome {
    asset: LocalAsset,
    albums: Vec<Album>,
    errors: Vec<DispatchError>,
}

pub struct GroupDispatcher {
    catalog: Arc<dyn CatalogClient>,
    index: Arc<AssetIndex>,
    albums: Arc<AlbumRegistry>,
    journal: Arc<dyn Journal>,
    options: DispatchOptions,
}

impl GroupDispatcher {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        index: Arc<AssetIndex>,
        albums: Arc<AlbumRegistry>,
        journal: Arc<dyn Journal>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            catalog,
            index,
            albums,
            journal,
            options,
        }
    }

    /// Every member is handled even when a sibling fails. The group, and the
    /// local files it holds, are released when this returns.
    pub async fn handle_group(&self, group: AssetGroup<LocalAsset>) -> Result<(), GroupFailures> {
        let (kind, assets, cover_index, group_albums) = group.into_parts();

        let outcomes: Vec<MemberOutcome> = stream::iter(assets)
            .map(|asset| self.handle_asset(asset))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut errors = Vec::new();
        let mut albums: Vec<Album> = Vec::new();
        let mut members = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            for album in group_albums.iter().chain(&outcome.asset.albums).chain(&outcome.albums) {
                if !albums.iter().any(|a| a.title == album.title) {
                    albums.push(album.clone());
                }
            }
            errors.extend(outcome.errors);
            members.push(outcome.asset);
        }

        let ids: Vec<String> = members.iter().filter_map(|a| a.server_id.clone()).collect();
        if !ids.is_empty() {
            for album in &albums {
                self.apply_album(album, &members, &ids, &mut errors).await;
            }
        }

        if self.options.stack.allows(kind) && ids.len() >= 2 {
            let cover = members
                .get(cover_index)
                .and_then(|a| a.server_id.clone())
                .unwrap_or_else(|| ids[0].clone());
            match self.catalog.stack(&cover, &ids).await {
                Ok(()) => {
                    for member in &members {
                        self.journal
                            .record(FileEvent::Stacked, &member.file_name, &[("cover", &cover)]);
                    }
                }
                Err(source) => {
                    self.journal
                        .record(FileEvent::Error, &cover, &[("error", &source.to_string())]);
                    errors.push(DispatchError::Stack { cover, source });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GroupFailures { errors })
        }
    }

    async fn apply_album(
        &self,
        album: &Album,
        members: &[LocalAsset],
        ids: &[String],
        errors: &mut Vec<DispatchError>,
    ) {
        match self.albums.add_assets(self.catalog.as_ref(), album, ids).await {
            Ok(()) => {
                for member in members.iter().filter(|m| m.server_id.is_some()) {
                    self.journal.record(
                        FileEvent::AddedToAlbum,
                        &member.file_name,
                        &[("album", &album.title)],
                    );
                }
            }
            Err(source) => {
                self.journal.record(
                    FileEvent::Error,
                    &album.title,
                    &[("error", &source.to_string())],
                );
                errors.push(DispatchError::Album {
                    title: album.title.clone(),
                    source,
                });
            }
        }
    }

    async fn handle_asset(&self, mut asset: LocalAsset) -> MemberOutcome {
        let mut albums = Vec::new();
        let mut errors = Vec::new();

        let index = Arc::clone(&self.index);
        let pending = asset.clone();
        let advised = tokio::task::spawn_blocking(move || advise(&index, pending)).await;
        let advice = match advised {
            Ok((advised, Ok(advice))) => {
                asset = advised;
                Ok(advice)
            }
            Ok((_, Err(source))) => Err(DispatchError::Advice {
                file: asset.file_name.clone(),
                source,
            }),
            Err(source) => Err(DispatchError::Task {
                file: asset.file_name.clone(),
                source,
            }),
        };
        let advice = match advice {
            Ok(advice) => advice,
            Err(error) => {
                self.journal.record(
                    FileEvent::Error,
                    &asset.file_name,
                    &[("error", &error.to_string())],
                );
                errors.push(error);
                return MemberOutcome {
                    asset,
                    albums,
                    errors,
                };
            }
        };

        match (advice.advice, advice.server_asset) {
            (Advice::SmallerOnServer, Some(server)) => {
                self.journal.record(
                    FileEvent::UploadUpgraded,
                    &asset.file_name,
                    &[("reason", &advice.message)],
                );
                albums.extend(server.albums.iter().cloned());
                match self.upload(&mut asset).await {
                    Ok(()) if self.options.delete_superseded => {
                        match self.catalog.delete(std::slice::from_ref(&server.id), true).await {
                            Ok(()) => self.journal.record(
                                FileEvent::DeletedFromServer,
                                &server.original_file_name,
                                &[("id", &server.id)],
                            ),
                            Err(source) => {
                                self.journal.record(
                                    FileEvent::Error,
                                    &server.original_file_name,
                                    &[("error", &source.to_string())],
                                );
                                errors.push(DispatchError::Delete {
                                    id: server.id.clone(),
                                    source,
                                });
                            }
                        }
                    }
                    Ok(()) => {}
                    Err(e) => errors.push(e),
                }
            }
            (Advice::SameOnServer, Some(server)) => {
                asset.server_id = Some(server.id.clone());
                albums.extend(server.albums.iter().cloned());
                self.journal.record(
                    FileEvent::ServerDuplicate,
                    &asset.file_name,
                    &[("reason", &advice.message)],
                );
            }
            (Advice::BetterOnServer, Some(server)) => {
                asset.server_id = Some(server.id.clone());
                self.journal.record(
                    FileEvent::ServerBetter,
                    &asset.file_name,
                    &[("reason", &advice.message)],
                );
            }
            _ => {
                if let Err(e) = self.upload(&mut asset).await {
                    errors.push(e);
                }
            }
        }

        MemberOutcome {
            asset,
            albums,
            errors,
        }
    }

    async fn upload(&self, asset: &mut LocalAsset) -> Result<(), DispatchError> {
        let response = match self.catalog.upload(asset).await {
            Ok(response) => response,
            Err(source) => {
                self.journal.record(
                    FileEvent::UploadServerError,
                    &asset.file_name,
                    &[("error", &source.to_string())],
                );
                return Err(DispatchError::Upload {
                    file: asset.file_name.clone(),
                    source,
                });
            }
        };

        if response.duplicate {
            self.journal.record(
                FileEvent::ServerDuplicate,
                &asset.file_name,
                &[("reason", "the server has this file")],
            );
        } else {
            self.journal
                .record(FileEvent::Uploaded, &asset.file_name, &[("id", &response.id)]);
            if let Some(record) = uploaded_record(asset, &response.id) {
                self.index.insert(record);
            }
        }
        asset.server_id = Some(response.id);
        Ok(())
    }
}

/// Reads the file metadata once so later steps reuse it, then advises.
/// Runs on a blocking task.
fn advise(
    index: &AssetIndex,
    asset: LocalAsset,
) -> (LocalAsset, Result<UploadAdvice, AdviceError>) {
    let asset = match asset.probe() {
        Ok(metadata) => asset.with_metadata(metadata),
        Err(_) => asset,
    };
    let advice = index.should_upload(&asset);
    (asset, advice)
}

/// The index record for a file the catalog just accepted. A file whose
/// size is unknown is left out so it can't be judged smaller later.
fn uploaded_record(asset: &LocalAsset, id: &str) -> Option<RemoteAsset> {
    match asset.probe() {
        Ok(metadata) => Some(RemoteAsset {
            id: id.to_string(),
            original_file_name: asset.file_name.clone(),
            taken: asset.taken,
            size: metadata.size,
            width: metadata.width,
            height: metadata.height,
            ..Default::default()
        }),
        Err(e) => {
            log::warn!("Not indexing uploaded {}: {}", asset.file_name, e);
            None
        }
    }
}
