use crate::core::exif::ExifService;
use crate::core::hash::{HashError, HashService};
use crate::core::names::{NameInfo, Recognizer};
use chrono::{DateTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Hash computation error: {0}")]
    Hash(#[from] HashError),
}

/// Anything the grouping stages can classify.
pub trait Asset: Send + Sync + 'static {
    fn name_info(&self) -> &NameInfo;
    fn date_taken(&self) -> Option<DateTime<Utc>>;
}

/// Albums are identified by their title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Album {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Album {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
        }
    }
}

/// Size and resolution used to compare two copies of a picture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaMetadata {
    pub fn new(size: u64, width: u32, height: u32) -> Self {
        Self {
            size,
            width: Some(width),
            height: Some(height),
        }
    }

    pub fn pixels(&self) -> Option<u64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(w as u64 * h as u64),
            _ => None,
        }
    }
}

/// A file waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct LocalAsset {
    pub path: PathBuf,
    pub file_name: String,
    pub name_info: NameInfo,
    pub taken: Option<DateTime<Utc>>,
    /// Albums the source wants this file in.
    pub albums: Vec<Album>,
    /// Catalog id, once the file is uploaded or matched to a server copy.
    pub server_id: Option<String>,
    metadata: Option<MediaMetadata>,
}

impl LocalAsset {
    pub fn new(path: impl Into<PathBuf>, recognizer: &Recognizer) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let name_info = recognizer.recognize(&file_name);

        Self {
            taken: name_info.taken,
            path,
            file_name,
            name_info,
            albums: Vec::new(),
            server_id: None,
            metadata: None,
        }
    }

    pub fn with_taken(mut self, taken: Option<DateTime<Utc>>) -> Self {
        self.taken = taken;
        self
    }

    /// Use known metadata instead of probing the file.
    pub fn with_metadata(mut self, metadata: MediaMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_album(mut self, album: Album) -> Self {
        if !self.albums.iter().any(|a| a.title == album.title) {
            self.albums.push(album);
        }
        self
    }

    /// Byte size and pixel dimensions. Dimensions the decoders can't read are
    /// left empty; a file that can't be stat'ed is an error.
    pub fn probe(&self) -> Result<MediaMetadata, AssetError> {
        if let Some(metadata) = &self.metadata {
            return Ok(metadata.clone());
        }

        let size = fs::metadata(&self.path)
            .map_err(|source| AssetError::Io {
                path: self.path.to_string_lossy().to_string(),
                source,
            })?
            .len();

        let (width, height) = match image::image_dimensions(&self.path) {
            Ok((w, h)) => (Some(w), Some(h)),
            Err(e) => {
                log::debug!(
                    "Could not read dimensions for {}: {}",
                    self.path.display(),
                    e
                );
                match ExifService::new(Utc.fix()).extract(&self.path) {
                    Ok(Some(info)) => (info.width, info.height),
                    _ => (None, None),
                }
            }
        };

        Ok(MediaMetadata {
            size,
            width,
            height,
        })
    }

    pub fn checksum(&self) -> Result<String, AssetError> {
        Ok(HashService::new().compute_content_hash(&self.path)?)
    }
}

impl Asset for LocalAsset {
    fn name_info(&self) -> &NameInfo {
        &self.name_info
    }

    fn date_taken(&self) -> Option<DateTime<Utc>> {
        self.taken
    }
}

/// A record held by the remote catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub id: String,
    pub original_file_name: String,
    #[serde(default)]
    pub taken: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_trashed: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// SHA-256 of the content, lowercase hex, when the catalog knows it.
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub albums: Vec<Album>,
    #[serde(skip)]
    pub name_info: NameInfo,
}

impl RemoteAsset {
    pub fn new(id: impl Into<String>, original_file_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            original_file_name: original_file_name.into(),
            ..Default::default()
        }
    }

    /// Fill `name_info` from the original file name.
    pub fn recognized(mut self, recognizer: &Recognizer) -> Self {
        self.name_info = recognizer.recognize(&self.original_file_name);
        self
    }

    pub fn metadata(&self) -> MediaMetadata {
        MediaMetadata {
            size: self.size,
            width: self.width,
            height: self.height,
        }
    }
}

impl Asset for RemoteAsset {
    fn name_info(&self) -> &NameInfo {
        &self.name_info
    }

    fn date_taken(&self) -> Option<DateTime<Utc>> {
        self.taken.or(self.name_info.taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::SupportedMedia;
    use chrono::FixedOffset;
    use std::fs;
    use tempfile::TempDir;

    fn recognizer() -> Recognizer {
        Recognizer::new(FixedOffset::east_opt(0).unwrap(), SupportedMedia::new())
    }

    fn create_test_image(path: &std::path::Path, width: u32, height: u32) {
        use image::{ImageBuffer, Rgb};

        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_local_asset_from_path() {
        let asset = LocalAsset::new("/photos/2023/20231207_101605_002.jpg", &recognizer());

        assert_eq!(asset.file_name, "20231207_101605_002.jpg");
        assert_eq!(asset.name_info.radical, "20231207_101605");
        assert_eq!(asset.date_taken(), asset.name_info.taken);
        assert!(asset.date_taken().is_some());
    }

    #[test]
    fn test_probe_reads_size_and_dimensions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("photo.png");
        create_test_image(&path, 64, 48);

        let metadata = LocalAsset::new(&path, &recognizer()).probe().unwrap();

        assert_eq!(metadata.size, fs::metadata(&path).unwrap().len());
        assert_eq!(metadata.pixels(), Some(64 * 48));
    }

    #[test]
    fn test_probe_unknown_dimensions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("IMG_0001.cr3");
        fs::write(&path, b"not really a raw file").unwrap();

        let metadata = LocalAsset::new(&path, &recognizer()).probe().unwrap();

        assert_eq!(metadata.size, 21);
        assert_eq!(metadata.pixels(), None);
    }

    #[test]
    fn test_probe_missing_file() {
        let result = LocalAsset::new("/non/existent/photo.jpg", &recognizer()).probe();

        assert!(matches!(result, Err(AssetError::Io { .. })));
    }

    #[test]
    fn test_preset_metadata_skips_file() {
        let asset = LocalAsset::new("/non/existent/photo.jpg", &recognizer())
            .with_metadata(MediaMetadata::new(10, 4000, 3000));

        assert_eq!(asset.probe().unwrap().pixels(), Some(12_000_000));
    }

    #[test]
    fn test_albums_are_deduplicated() {
        let asset = LocalAsset::new("a.jpg", &recognizer())
            .with_album(Album::new("Holidays"))
            .with_album(Album::new("Holidays"));

        assert_eq!(asset.albums.len(), 1);
    }

    #[test]
    fn test_remote_asset_from_json() {
        let json = r#"{"id":"a1","original_file_name":"IMG_003.jpg","size":1024,"width":1000,"height":800}"#;
        let asset: RemoteAsset = serde_json::from_str(json).unwrap();
        let asset = asset.recognized(&recognizer());

        assert_eq!(asset.name_info().radical, "IMG_003");
        assert!(!asset.is_trashed);
        assert_eq!(asset.metadata().pixels(), Some(800_000));
    }
}
