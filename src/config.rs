use crate::core::media::SupportedMedia;
use crate::core::names::Recognizer;
use chrono::{FixedOffset, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid time zone '{0}', expected UTC or an offset like +02:00")]
    TimeZone(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Offset used to read timestamps that carry no zone. Local when unset.
    pub time_zone: Option<String>,
    pub grouping: GroupingConfig,
    pub upload: UploadConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    pub series_gap_ms: u64,
    pub burst_gap_ms: u64,
    pub pair_gap_ms: u64,
    pub channel_capacity: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            series_gap_ms: 10_000,
            burst_gap_ms: 900,
            pair_gap_ms: 1_000,
            channel_capacity: 32,
        }
    }
}

impl GroupingConfig {
    pub fn series_gap(&self) -> TimeDelta {
        millis(self.series_gap_ms)
    }

    pub fn burst_gap(&self) -> TimeDelta {
        millis(self.burst_gap_ms)
    }

    pub fn pair_gap(&self) -> TimeDelta {
        millis(self.pair_gap_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Members of one group advised and uploaded at the same time.
    pub concurrency: usize,
    pub capture_tolerance_secs: u64,
    /// Delete the server copy when a better local one replaces it.
    pub delete_superseded: bool,
    pub stack_bursts: bool,
    pub stack_raw_jpg: bool,
    pub stack_heic_jpg: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            capture_tolerance_secs: 5,
            delete_superseded: true,
            stack_bursts: true,
            stack_raw_jpg: true,
            stack_heic_jpg: false,
        }
    }
}

impl UploadConfig {
    pub fn capture_tolerance(&self) -> TimeDelta {
        millis(self.capture_tolerance_secs.saturating_mul(1_000))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Extensions to pick up. Every supported type when empty.
    pub extensions: Vec<String>,
    /// Glob patterns matched against paths relative to the scanned root.
    pub exclude_patterns: Vec<String>,
    /// Put every file in an album named after its parent folder.
    pub folder_as_album: bool,
}

fn millis(ms: u64) -> TimeDelta {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX)
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content)?;
        settings.offset()?;
        Ok(settings)
    }

    /// An explicit path must exist. Otherwise the user config file is read
    /// when present, and defaults apply when it isn't.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                log::info!("Loading settings from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stackrs").join("config.toml"))
    }

    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        match self.time_zone.as_deref() {
            None => Ok(*Local::now().offset()),
            Some(tz) => parse_offset(tz).ok_or_else(|| ConfigError::TimeZone(tz.to_string())),
        }
    }

    pub fn media(&self) -> SupportedMedia {
        if self.scan.extensions.is_empty() {
            SupportedMedia::new()
        } else {
            SupportedMedia::new().restricted_to(&self.scan.extensions)
        }
    }

    pub fn recognizer(&self) -> Result<Recognizer, ConfigError> {
        Ok(Recognizer::new(self.offset()?, self.media()))
    }
}

/// `UTC`, `Z`, `+02:00`, `-0530` or `+2`.
fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first().copied()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 && rest.is_ascii() => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
