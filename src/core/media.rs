use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Heic,
    Raw,
    Video,
    #[default]
    Unknown,
}

impl MediaType {
    /// Still pictures, whatever the container.
    pub fn is_image(self) -> bool {
        matches!(self, MediaType::Image | MediaType::Heic | MediaType::Raw)
    }
}

/// Extension table deciding which files are handled and how.
#[derive(Debug, Clone)]
pub struct SupportedMedia {
    extensions: HashMap<String, MediaType>,
}

impl SupportedMedia {
    pub fn new() -> Self {
        let mut extensions = HashMap::new();
        for ext in ["jpg", "jpeg", "png", "gif", "webp", "tif", "tiff", "bmp"] {
            extensions.insert(ext.to_string(), MediaType::Image);
        }
        for ext in ["heic", "heif"] {
            extensions.insert(ext.to_string(), MediaType::Heic);
        }
        for ext in [
            "raw", "dng", "cr2", "cr3", "nef", "arw", "orf", "rw2", "raf",
        ] {
            extensions.insert(ext.to_string(), MediaType::Raw);
        }
        for ext in ["mp4", "mov", "avi", "mkv", "3gp", "m4v"] {
            extensions.insert(ext.to_string(), MediaType::Video);
        }

        Self { extensions }
    }

    /// Restrict the table to the given extensions. Unknown entries are ignored.
    pub fn restricted_to(&self, allowed: &[String]) -> Self {
        let extensions = allowed
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .filter_map(|ext| self.extensions.get(&ext).map(|t| (ext, *t)))
            .collect();
        Self { extensions }
    }

    /// Accepts the extension with or without its leading dot, in any case.
    pub fn type_from_ext(&self, ext: &str) -> MediaType {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.extensions
            .get(&ext)
            .copied()
            .unwrap_or(MediaType::Unknown)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.type_from_ext(&ext.to_string_lossy()) != MediaType::Unknown)
            .unwrap_or(false)
    }

    pub fn is_jpeg(ext: &str) -> bool {
        matches!(
            ext.trim_start_matches('.').to_lowercase().as_str(),
            "jpg" | "jpeg"
        )
    }
}

impl Default for SupportedMedia {
    fn default() -> Self {
        Self::new()
    }
}
