use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEvent {
    DiscoveredFile,
    Uploaded,
    UploadUpgraded,
    ServerDuplicate,
    ServerBetter,
    UploadServerError,
    DeletedFromServer,
    AddedToAlbum,
    Stacked,
    Error,
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileEvent::DiscoveredFile => "discovered",
            FileEvent::Uploaded => "uploaded",
            FileEvent::UploadUpgraded => "upgraded on server",
            FileEvent::ServerDuplicate => "already on server",
            FileEvent::ServerBetter => "better copy on server",
            FileEvent::UploadServerError => "upload error",
            FileEvent::DeletedFromServer => "deleted from server",
            FileEvent::AddedToAlbum => "added to album",
            FileEvent::Stacked => "stacked",
            FileEvent::Error => "error",
        };
        f.write_str(label)
    }
}

/// Write-only record of what happened to each file.
pub trait Journal: Send + Sync {
    fn record(&self, event: FileEvent, subject: &str, attrs: &[(&str, &str)]);
}

#[derive(Serialize, Deserialize, Debug)]
struct JournalRecord {
    timestamp: String,
    event: FileEvent,
    subject: String,
    attrs: BTreeMap<String, String>,
}

/// Logs every event, counts them, and optionally appends them as JSON lines.
#[derive(Default)]
pub struct EventJournal {
    counts: Mutex<BTreeMap<FileEvent, u64>>,
    out: Option<Mutex<File>>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            counts: Mutex::default(),
            out: Some(Mutex::new(file)),
        })
    }

    pub fn count(&self, event: FileEvent) -> u64 {
        self.counts()
            .get(&event)
            .copied()
            .unwrap_or(0)
    }

    pub fn counts(&self) -> BTreeMap<FileEvent, u64> {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One line per event seen, in a fixed order.
    pub fn summary(&self) -> String {
        self.counts()
            .iter()
            .map(|(event, n)| format!("{:>24}: {}", event.to_string(), n))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Journal for EventJournal {
    fn record(&self, event: FileEvent, subject: &str, attrs: &[(&str, &str)]) {
        let details = attrs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match event {
            FileEvent::Error | FileEvent::UploadServerError => {
                log::error!("{}: {} {}", event, subject, details)
            }
            FileEvent::DiscoveredFile => log::debug!("{}: {} {}", event, subject, details),
            _ => log::info!("{}: {} {}", event, subject, details),
        }

        *self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default() += 1;

        if let Some(out) = &self.out {
            let record = JournalRecord {
                timestamp: Utc::now().to_rfc3339(),
                event,
                subject: subject.to_string(),
                attrs: attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            };
            let written = serde_json::to_string(&record)
                .map_err(std::io::Error::from)
                .and_then(|line| {
                    let mut file = out.lock().unwrap_or_else(PoisonError::into_inner);
                    writeln!(file, "{}", line)
                });
            if let Err(e) = written {
                log::warn!("Could not write journal record: {}", e);
            }
        }
    }
}
