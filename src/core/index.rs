//! What the catalog already holds, and what to do with a local file given
//! that.

use crate::core::asset::{Asset, AssetError, LocalAsset, MediaMetadata, RemoteAsset};
use crate::core::hash::HashService;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdviceError {
    #[error("Cannot inspect local file: {0}")]
    Probe(#[from] AssetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advice {
    NotOnServer,
    SameOnServer,
    /// The local file is better than the server copy.
    SmallerOnServer,
    /// The server copy is better than the local file.
    BetterOnServer,
}

impl fmt::Display for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Advice::NotOnServer => "not on server",
            Advice::SameOnServer => "same on server",
            Advice::SmallerOnServer => "smaller on server",
            Advice::BetterOnServer => "better on server",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadAdvice {
    pub advice: Advice,
    pub server_asset: Option<Arc<RemoteAsset>>,
    pub message: String,
}

impl UploadAdvice {
    fn new(advice: Advice, server_asset: Option<Arc<RemoteAsset>>, message: String) -> Self {
        Self {
            advice,
            server_asset,
            message,
        }
    }
}

/// Immutable lookup table built by [`AssetIndex::reindex`].
#[derive(Debug, Default, Clone)]
pub struct IndexSnapshot {
    by_name: HashMap<String, Vec<Arc<RemoteAsset>>>,
}

impl IndexSnapshot {
    fn build(assets: &[Arc<RemoteAsset>]) -> Self {
        let mut snapshot = Self::default();
        for asset in assets {
            snapshot.add(asset);
        }
        snapshot
    }

    /// A copy of this table with one more record.
    fn with(&self, asset: &Arc<RemoteAsset>) -> Self {
        let mut snapshot = self.clone();
        snapshot.add(asset);
        snapshot
    }

    fn add(&mut self, asset: &Arc<RemoteAsset>) {
        if asset.is_trashed {
            return;
        }
        self.by_name
            .entry(asset.original_file_name.to_lowercase())
            .or_default()
            .push(Arc::clone(asset));
    }

    /// Records whose file name matches, ignoring case.
    pub fn get(&self, file_name: &str) -> &[Arc<RemoteAsset>] {
        self.by_name
            .get(&file_name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Remote assets by normalized file name. Lookups read a snapshot that is
/// only ever replaced whole.
pub struct AssetIndex {
    assets: Mutex<Vec<Arc<RemoteAsset>>>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    tolerance: TimeDelta,
}

impl AssetIndex {
    /// `tolerance` is how far apart two capture times may be for the same
    /// picture.
    pub fn new(assets: Vec<RemoteAsset>, tolerance: TimeDelta) -> Self {
        let index = Self {
            assets: Mutex::new(assets.into_iter().map(Arc::new).collect()),
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            tolerance,
        };
        index.reindex();
        index
    }

    /// Rebuild the lookup table from every record. The records lock is held
    /// until the new table is published.
    pub fn reindex(&self) {
        let assets = self.assets.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Arc::new(IndexSnapshot::build(&assets));
        log::debug!("Asset index rebuilt with {} entries", snapshot.len());
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Add a record and make it visible to lookups.
    pub fn insert(&self, asset: RemoteAsset) -> Arc<RemoteAsset> {
        let asset = Arc::new(asset);
        let mut assets = self.assets.lock().unwrap_or_else(PoisonError::into_inner);
        assets.push(Arc::clone(&asset));
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *snapshot = Arc::new(snapshot.with(&asset));
        asset
    }

    /// Every record, trashed ones included.
    pub fn len(&self) -> usize {
        self.assets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn should_upload(&self, local: &LocalAsset) -> Result<UploadAdvice, AdviceError> {
        let snapshot = self.snapshot();
        let candidates: Vec<&Arc<RemoteAsset>> = snapshot
            .get(&local.file_name)
            .iter()
            .filter(|r| self.same_moment(local.date_taken(), r.date_taken()))
            .collect();

        if candidates.is_empty() {
            return Ok(UploadAdvice::new(
                Advice::NotOnServer,
                None,
                format!("{} is not on the server", local.file_name),
            ));
        }

        let metadata = local.probe()?;
        let mut local_checksum: Option<String> = None;
        for candidate in &candidates {
            if candidate.size != metadata.size {
                continue;
            }
            let identical = match &candidate.checksum {
                None => true,
                Some(remote) => {
                    if local_checksum.is_none() {
                        local_checksum = Some(local.checksum()?);
                    }
                    local_checksum
                        .as_deref()
                        .is_some_and(|local| HashService::same_checksum(local, remote))
                }
            };
            if identical {
                return Ok(UploadAdvice::new(
                    Advice::SameOnServer,
                    Some(Arc::clone(candidate)),
                    format!("the server has {} with the same size", candidate.original_file_name),
                ));
            }
        }

        let best = candidates
            .iter()
            .copied()
            .max_by_key(|c| (c.metadata().pixels().unwrap_or(0), c.size))
            .map(Arc::clone);
        let Some(best) = best else {
            return Ok(UploadAdvice::new(Advice::NotOnServer, None, String::new()));
        };

        let remote = best.metadata();
        let (local_quality, remote_quality) = quality(&metadata, &remote);
        let advice = if local_quality > remote_quality {
            UploadAdvice::new(
                Advice::SmallerOnServer,
                Some(best),
                format!(
                    "the local file is better ({}) than the server copy ({})",
                    describe(&metadata),
                    describe(&remote)
                ),
            )
        } else if remote_quality > local_quality {
            UploadAdvice::new(
                Advice::BetterOnServer,
                Some(best),
                format!(
                    "the server copy is better ({}) than the local file ({})",
                    describe(&remote),
                    describe(&metadata)
                ),
            )
        } else {
            UploadAdvice::new(
                Advice::SameOnServer,
                Some(best),
                format!("the server has a copy of the same quality ({})", describe(&remote)),
            )
        };
        Ok(advice)
    }

    fn same_moment(&self, a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => {
                let gap = if a >= b { a - b } else { b - a };
                gap <= self.tolerance
            }
            _ => true,
        }
    }
}

/// Pixel counts when both sides know them, byte sizes otherwise.
fn quality(local: &MediaMetadata, remote: &MediaMetadata) -> (u64, u64) {
    match (local.pixels(), remote.pixels()) {
        (Some(l), Some(r)) => (l, r),
        _ => (local.size, remote.size),
    }
}

fn describe(metadata: &MediaMetadata) -> String {
    match (metadata.width, metadata.height) {
        (Some(w), Some(h)) => format!("{}x{}, {} bytes", w, h, metadata.size),
        _ => format!("{} bytes", metadata.size),
    }
}
