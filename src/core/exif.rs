use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use exif::{In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The EXIF fields the grouping and the upload advisor care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureInfo {
    pub taken: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Reads EXIF capture data. Camera clocks carry no zone, so dates are read in
/// the configured offset.
pub struct ExifService {
    tz: FixedOffset,
}

impl ExifService {
    pub fn new(tz: FixedOffset) -> Self {
        Self { tz }
    }

    /// `Ok(None)` when the file has no usable EXIF block.
    pub fn extract(&self, file_path: &Path) -> Result<Option<CaptureInfo>, ExifError> {
        let file = File::open(file_path)?;
        let mut buf_reader = BufReader::new(file);

        let exif_reader = match Reader::new().read_from_container(&mut buf_reader) {
            Ok(reader) => reader,
            Err(e) => {
                log::debug!("No EXIF in {}: {}", file_path.display(), e);
                return Ok(None);
            }
        };

        let mut info = CaptureInfo::default();

        if let Some(field) = exif_reader.get_field(Tag::DateTimeOriginal, In::PRIMARY) {
            info.taken = self.field_to_string(&field.value).and_then(|s| self.parse_exif_datetime(&s));
        } else if let Some(field) = exif_reader.get_field(Tag::DateTime, In::PRIMARY) {
            info.taken = self.field_to_string(&field.value).and_then(|s| self.parse_exif_datetime(&s));
        }

        if let Some(field) = exif_reader.get_field(Tag::PixelXDimension, In::PRIMARY) {
            info.width = field.value.get_uint(0);
        }
        if let Some(field) = exif_reader.get_field(Tag::PixelYDimension, In::PRIMARY) {
            info.height = field.value.get_uint(0);
        }

        if info == CaptureInfo::default() {
            Ok(None)
        } else {
            Ok(Some(info))
        }
    }

    fn field_to_string(&self, value: &Value) -> Option<String> {
        match value {
            Value::Ascii(vec) => vec.first().map(|ascii_val| {
                String::from_utf8_lossy(ascii_val)
                    .trim_end_matches('\0')
                    .to_string()
            }),
            _ => None,
        }
    }

    /// EXIF datetime format: "YYYY:MM:DD HH:MM:SS"
    fn parse_exif_datetime(&self, datetime_str: &str) -> Option<DateTime<Utc>> {
        match NaiveDateTime::parse_from_str(datetime_str.trim(), "%Y:%m:%d %H:%M:%S") {
            Ok(naive) => self
                .tz
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
            Err(_) => {
                log::warn!("Failed to parse EXIF datetime: {}", datetime_str);
                None
            }
        }
    }
}
