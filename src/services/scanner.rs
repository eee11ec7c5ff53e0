use crate::config::ScanConfig;
use crate::core::asset::{Album, LocalAsset};
use crate::core::exif::ExifService;
use crate::core::names::Recognizer;
use chrono::{DateTime, Utc};
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Files resolved in parallel before they are sent downstream.
const BATCH_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Invalid exclude pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Glob patterns matched against the path relative to the root and
    /// against the file name.
    pub exclude_patterns: Vec<String>,
    pub folder_as_album: bool,
}

impl From<&ScanConfig> for ScanOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            exclude_patterns: config.exclude_patterns.clone(),
            folder_as_album: config.folder_as_album,
        }
    }
}

/// Turns a directory tree into a stream of [`LocalAsset`]s.
pub struct ScannerService {
    recognizer: Recognizer,
    capacity: usize,
}

impl ScannerService {
    pub fn new(recognizer: Recognizer) -> Self {
        Self {
            recognizer,
            capacity: BATCH_SIZE,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Walk `root` on a blocking task. Files come out sorted by path within
    /// each directory; per-entry failures are sent as `Err` and the walk goes
    /// on. Cancelling, or dropping the receiver, stops the walk.
    pub fn scan(
        &self,
        root: &Path,
        options: &ScanOptions,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<LocalAsset, ScanError>>, ScanError> {
        if !root.exists() {
            return Err(ScanError::InvalidPath {
                path: root.to_string_lossy().to_string(),
            });
        }
        if !root.is_dir() {
            return Err(ScanError::InvalidPath {
                path: format!("{} is not a directory", root.to_string_lossy()),
            });
        }

        let exclude_patterns = options
            .exclude_patterns
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let walker = Walker {
            root: root.to_path_buf(),
            recognizer: self.recognizer.clone(),
            exif_service: ExifService::new(self.recognizer.tz()),
            exclude_patterns,
            folder_as_album: options.folder_as_album,
        };
        tokio::task::spawn_blocking(move || walker.run(tx, cancel));

        Ok(rx)
    }
}

struct Walker {
    root: PathBuf,
    recognizer: Recognizer,
    exif_service: ExifService,
    exclude_patterns: Vec<Pattern>,
    folder_as_album: bool,
}

type ScanSender = mpsc::Sender<Result<LocalAsset, ScanError>>;

impl Walker {
    fn run(self, tx: ScanSender, cancel: CancellationToken) {
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        let mut discovered = 0usize;

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
        {
            if cancel.is_cancelled() {
                log::info!("Scan of {} cancelled", self.root.display());
                let _ = tx.blocking_send(Err(ScanError::Cancelled));
                return;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    if tx.blocking_send(Err(e.into())).is_err() {
                        return;
                    }
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file()
                || !self.recognizer.media().is_supported(path)
                || self.is_excluded(path)
            {
                continue;
            }

            discovered += 1;
            batch.push(path.to_path_buf());
            if batch.len() == BATCH_SIZE && !self.flush(&mut batch, &tx) {
                return;
            }
        }

        if self.flush(&mut batch, &tx) {
            log::info!("Scan of {} found {} files", self.root.display(), discovered);
        }
    }

    /// Returns false once the receiver is gone.
    fn flush(&self, batch: &mut Vec<PathBuf>, tx: &ScanSender) -> bool {
        let assets: Vec<Result<LocalAsset, ScanError>> =
            batch.par_iter().map(|path| self.process_file(path)).collect();
        batch.clear();

        assets.into_iter().all(|asset| tx.blocking_send(asset).is_ok())
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let relative = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        self.exclude_patterns
            .iter()
            .any(|pattern| pattern.matches(&relative) || pattern.matches(&file_name))
    }

    /// Capture time comes from the name, then EXIF, then the file's
    /// modification time.
    fn process_file(&self, path: &Path) -> Result<LocalAsset, ScanError> {
        let mut asset = LocalAsset::new(path, &self.recognizer);

        if asset.taken.is_none() {
            asset.taken = match self.exif_service.extract(path) {
                Ok(Some(info)) => info.taken,
                Ok(None) => None,
                Err(e) => {
                    log::warn!("Failed to extract EXIF from {}: {}", path.display(), e);
                    None
                }
            };
        }
        if asset.taken.is_none() {
            let modified = fs::metadata(path)?.modified()?;
            asset.taken = Some(DateTime::<Utc>::from(modified));
        }

        if self.folder_as_album {
            let folder = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string());
            if let Some(folder) = folder {
                asset = asset.with_album(Album::new(folder));
            }
        }

        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::SupportedMedia;
    use chrono::{FixedOffset, TimeZone};
    use tempfile::TempDir;

    fn create_test_image(path: &Path, width: u32, height: u32) {
        use image::{ImageBuffer, Rgb};

        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });
        img.save(path).unwrap();
    }

    fn scanner() -> ScannerService {
        ScannerService::new(Recognizer::new(
            FixedOffset::east_opt(0).unwrap(),
            SupportedMedia::new(),
        ))
    }

    async fn collect(
        mut rx: mpsc::Receiver<Result<LocalAsset, ScanError>>,
    ) -> Vec<Result<LocalAsset, ScanError>> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let temp_dir = TempDir::new().unwrap();

        let rx = scanner()
            .scan(temp_dir.path(), &ScanOptions::default(), CancellationToken::new())
            .unwrap();

        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_invalid_path() {
        let result = scanner().scan(
            Path::new("/non/existent/path"),
            &ScanOptions::default(),
            CancellationToken::new(),
        );

        assert!(matches!(result, Err(ScanError::InvalidPath { .. })));
    }

    #[tokio::test]
    async fn test_scan_with_exclude_patterns() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("trash")).unwrap();
        create_test_image(&temp_dir.path().join("included.jpg"), 10, 10);
        create_test_image(&temp_dir.path().join("trash").join("excluded.jpg"), 10, 10);
        create_test_image(&temp_dir.path().join("thumb_small.png"), 10, 10);
        fs::write(temp_dir.path().join("notes.txt"), "not media").unwrap();

        let options = ScanOptions {
            exclude_patterns: vec!["trash/*".to_string(), "thumb_*".to_string()],
            ..Default::default()
        };
        let rx = scanner()
            .scan(temp_dir.path(), &options, CancellationToken::new())
            .unwrap();
        let assets: Vec<LocalAsset> = collect(rx).await.into_iter().map(Result::unwrap).collect();

        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].file_name, "included.jpg");
    }

    #[tokio::test]
    async fn test_capture_time_sources() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("IMG_20231014_183246.jpg"), 10, 10);
        create_test_image(&temp_dir.path().join("photo1.jpg"), 10, 10);

        let rx = scanner()
            .scan(temp_dir.path(), &ScanOptions::default(), CancellationToken::new())
            .unwrap();
        let assets: Vec<LocalAsset> = collect(rx).await.into_iter().map(Result::unwrap).collect();

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].file_name, "IMG_20231014_183246.jpg");
        assert_eq!(
            assets[0].taken,
            Some(Utc.with_ymd_and_hms(2023, 10, 14, 18, 32, 46).unwrap())
        );
        // No name time and no EXIF: the modification time.
        let modified = fs::metadata(&assets[1].path).unwrap().modified().unwrap();
        assert_eq!(assets[1].taken, Some(DateTime::<Utc>::from(modified)));
    }

    #[tokio::test]
    async fn test_folder_as_album() {
        let temp_dir = TempDir::new().unwrap();
        let trip = temp_dir.path().join("Trip 2023");
        fs::create_dir(&trip).unwrap();
        create_test_image(&trip.join("a.jpg"), 10, 10);

        let options = ScanOptions {
            folder_as_album: true,
            ..Default::default()
        };
        let rx = scanner()
            .scan(temp_dir.path(), &options, CancellationToken::new())
            .unwrap();
        let assets: Vec<LocalAsset> = collect(rx).await.into_iter().map(Result::unwrap).collect();

        assert_eq!(assets[0].albums, vec![Album::new("Trip 2023")]);
    }

    #[tokio::test]
    async fn test_cancelled_scan() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..5 {
            create_test_image(&temp_dir.path().join(format!("img_{i}.png")), 10, 10);
        }
        let cancel = CancellationToken::new();
        cancel.cancel();

        let rx = scanner()
            .scan(temp_dir.path(), &ScanOptions::default(), cancel)
            .unwrap();
        let items = collect(rx).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ScanError::Cancelled)));
    }

    #[test]
    fn test_options_from_config() {
        let config = ScanConfig {
            exclude_patterns: vec!["*.tmp".to_string()],
            folder_as_album: true,
            ..Default::default()
        };

        let options = ScanOptions::from(&config);

        assert!(options.folder_as_album);
        assert_eq!(options.exclude_patterns, vec!["*.tmp"]);
    }
}
