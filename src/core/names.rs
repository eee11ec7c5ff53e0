//! Filename pattern recognition.
//!
//! Cameras and phones encode bursts and shot series in file names. A
//! [`Recognizer`] runs an ordered list of [`NameMatcher`]s over a bare file
//! name and returns the first hit as a [`NameInfo`]. Names no vendor claims
//! get a generic description built from the stem.

use crate::core::media::{MediaType, SupportedMedia};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameKind {
    #[default]
    None,
    Burst,
    Series,
}

/// What a file name tells about its asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameInfo {
    /// Identifier shared by every member of a burst, series or pair.
    pub radical: String,
    /// The full file name.
    pub base: String,
    /// Extension with its leading dot, as written in the name.
    pub ext: String,
    pub media: MediaType,
    /// Sequence number, 0 when the name carries none.
    pub index: u32,
    pub is_cover: bool,
    pub kind: NameKind,
    /// Capture time embedded in the name, if any could be parsed.
    pub taken: Option<DateTime<Utc>>,
}

impl NameInfo {
    pub fn is_jpeg(&self) -> bool {
        SupportedMedia::is_jpeg(&self.ext)
    }

    pub fn is_raw(&self) -> bool {
        self.media == MediaType::Raw
    }

    pub fn is_heic(&self) -> bool {
        self.media == MediaType::Heic
    }

    /// Radical without its trailing counter: `IMG_0042` gives `IMG_`.
    pub fn prefix(&self) -> &str {
        self.radical.trim_end_matches(|c: char| c.is_ascii_digit())
    }
}

type Extract = fn(&Captures<'_>, &str, &Recognizer) -> NameInfo;

/// One vendor naming convention: a pattern and the function turning its
/// captures into a [`NameInfo`].
#[derive(Debug, Clone)]
pub struct NameMatcher {
    vendor: &'static str,
    pattern: &'static Regex,
    extract: Extract,
}

impl NameMatcher {
    pub fn new(vendor: &'static str, pattern: &'static Regex, extract: Extract) -> Self {
        Self {
            vendor,
            pattern,
            extract,
        }
    }

    pub fn vendor(&self) -> &'static str {
        self.vendor
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    fn apply(&self, name: &str, recognizer: &Recognizer) -> Option<NameInfo> {
        let captures = self.pattern.captures(name)?;
        Some((self.extract)(&captures, name, recognizer))
    }
}

// 00001IMG_00001_BURST20210101153000.jpg
// 00002IMG_00002_BURST20210101153000_COVER.jpg
static NEXUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{5})IMG_\d{5}_(BURST(\d{14}))(_COVER)?(\..+)$").expect("nexus pattern")
});

// IMG_20231014_183246_BURST001_COVER.jpg
// IMG_20231014_183246_BURST002.jpg
static HUAWEI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*_(\d{8}_\d{6}))_BURST(\d{3})(_COVER)?(\..+)$").expect("huawei pattern")
});

// DSC_0001_BURST20230709220904977.JPG
static XPERIA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^DSC_(\d{4})_(BURST(\d{17}))(_COVER)?(\..+)$").expect("xperia pattern")
});

// PXL_20230330_184138390.RAW-01.MP.COVER.jpg
// PXL_20230330_184138390.RAW-02.ORIGINAL.dng is not a burst frame
static PIXEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(PXL_(\d{8}_\d{9}))\.RAW-(\d{2})\.MP(\.COVER)?(\..+)$").expect("pixel pattern")
});

// 20231207_101605_001.jpg
static SAMSUNG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{8}_\d{6})_(\d{3})(\..+)$").expect("samsung pattern"));

// IMG_20231014_183246_1.jpg, several shots within the same second
static SERIES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?(\d{8}_\d{6}))[_-](\d{1,2})(\..+)$").expect("series pattern")
});

static EMBEDDED_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8})[_-]?(\d{6})").expect("timestamp pattern"));

fn text<'a>(captures: &'a Captures<'_>, i: usize) -> &'a str {
    captures.get(i).map(|m| m.as_str()).unwrap_or_default()
}

fn number(captures: &Captures<'_>, i: usize) -> u32 {
    text(captures, i).parse().unwrap_or(0)
}

fn flag(captures: &Captures<'_>, i: usize) -> bool {
    captures.get(i).is_some()
}

fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

fn nexus(c: &Captures<'_>, name: &str, r: &Recognizer) -> NameInfo {
    r.burst_info(name, text(c, 2), text(c, 5), number(c, 1), flag(c, 4), text(c, 3))
}

fn huawei(c: &Captures<'_>, name: &str, r: &Recognizer) -> NameInfo {
    r.burst_info(name, text(c, 1), text(c, 5), number(c, 3), flag(c, 4), text(c, 2))
}

fn xperia(c: &Captures<'_>, name: &str, r: &Recognizer) -> NameInfo {
    r.burst_info(name, text(c, 2), text(c, 5), number(c, 1), flag(c, 4), text(c, 3))
}

fn pixel(c: &Captures<'_>, name: &str, r: &Recognizer) -> NameInfo {
    r.burst_info(name, text(c, 1), text(c, 5), number(c, 3), flag(c, 4), text(c, 2))
}

fn samsung(c: &Captures<'_>, name: &str, r: &Recognizer) -> NameInfo {
    let index = number(c, 2);
    r.burst_info(name, text(c, 1), text(c, 3), index, index == 1, text(c, 1))
}

fn series(c: &Captures<'_>, name: &str, r: &Recognizer) -> NameInfo {
    NameInfo {
        kind: NameKind::Series,
        is_cover: false,
        ..r.burst_info(name, text(c, 1), text(c, 4), number(c, 3), false, text(c, 2))
    }
}

/// The built-in vendor registry, most specific pattern first.
pub fn vendor_matchers() -> Vec<NameMatcher> {
    vec![
        NameMatcher::new("nexus", &NEXUS_RE, nexus),
        NameMatcher::new("huawei", &HUAWEI_RE, huawei),
        NameMatcher::new("xperia", &XPERIA_RE, xperia),
        NameMatcher::new("pixel", &PIXEL_RE, pixel),
        NameMatcher::new("samsung", &SAMSUNG_RE, samsung),
        NameMatcher::new("series", &SERIES_RE, series),
    ]
}

#[derive(Debug, Clone)]
pub struct Recognizer {
    matchers: Vec<NameMatcher>,
    tz: FixedOffset,
    media: SupportedMedia,
}

impl Recognizer {
    pub fn new(tz: FixedOffset, media: SupportedMedia) -> Self {
        Self {
            matchers: vendor_matchers(),
            tz,
            media,
        }
    }

    /// Recognizer reading embedded timestamps in the machine's current offset.
    pub fn local() -> Self {
        Self::new(*Local::now().offset(), SupportedMedia::new())
    }

    /// Append a matcher. It is tried after every matcher already registered.
    pub fn register(&mut self, matcher: NameMatcher) {
        self.matchers.push(matcher);
    }

    pub fn tz(&self) -> FixedOffset {
        self.tz
    }

    pub fn media(&self) -> &SupportedMedia {
        &self.media
    }

    pub fn recognize(&self, name: &str) -> NameInfo {
        self.matchers
            .iter()
            .find_map(|m| m.apply(name, self))
            .unwrap_or_else(|| self.generic(name))
    }

    /// Vendors whose pattern matches `name`.
    pub fn matching_vendors(&self, name: &str) -> Vec<&'static str> {
        self.matchers
            .iter()
            .filter(|m| m.matches(name))
            .map(|m| m.vendor())
            .collect()
    }

    fn burst_info(
        &self,
        name: &str,
        radical: &str,
        ext: &str,
        index: u32,
        is_cover: bool,
        stamp: &str,
    ) -> NameInfo {
        NameInfo {
            radical: radical.to_string(),
            base: name.to_string(),
            ext: ext.to_string(),
            media: self.media.type_from_ext(ext),
            index,
            is_cover,
            kind: NameKind::Burst,
            taken: self.parse_compact(stamp),
        }
    }

    fn generic(&self, name: &str) -> NameInfo {
        let (stem, ext) = split_ext(name);
        let counter = &stem[stem.trim_end_matches(|c: char| c.is_ascii_digit()).len()..];
        let taken = EMBEDDED_TIME_RE
            .captures(stem)
            .and_then(|c| self.parse_compact(&format!("{}{}", text(&c, 1), text(&c, 2))));

        NameInfo {
            radical: stem.to_string(),
            base: name.to_string(),
            ext: ext.to_string(),
            media: self.media.type_from_ext(ext),
            index: counter.parse().unwrap_or(0),
            is_cover: false,
            kind: NameKind::None,
            taken,
        }
    }

    /// Reads `YYYYMMDDhhmmss[mmm]` out of the digits of `stamp`, in the
    /// recognizer's offset.
    fn parse_compact(&self, stamp: &str) -> Option<DateTime<Utc>> {
        let digits: String = stamp.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 14 {
            return None;
        }
        let field = |from: usize, to: usize| digits[from..to].parse::<u32>().ok();
        let millis = match digits.len() {
            14 => 0,
            n => format!("{:0<3}", &digits[14..n.min(17)]).parse().ok()?,
        };

        let date = NaiveDate::from_ymd_opt(field(0, 4)? as i32, field(4, 6)?, field(6, 8)?)?;
        let naive = date.and_hms_milli_opt(field(8, 10)?, field(10, 12)?, field(12, 14)?, millis)?;
        self.tz
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl Default for Recognizer {
    fn default() -> Self {
        Self::local()
    }
}
