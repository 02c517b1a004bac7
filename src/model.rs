//! Core data types shared by the catalogue, session and persistence layers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Slowest allowed auto-scroll multiplier.
pub const MIN_AUTO_SCROLL_SPEED: f64 = 0.5;

/// Fastest allowed auto-scroll multiplier.
pub const MAX_AUTO_SCROLL_SPEED: f64 = 5.0;

/// Content language of a chapter.
///
/// Georgian chapters come from the local authoritative store; English
/// chapters are backfilled from the remote feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "ge")]
    Georgian,
    #[serde(rename = "en")]
    English,
}

impl Language {
    /// Language served by the local authoritative source.
    pub const LOCAL: Language = Language::Georgian;

    /// Language backfilled from the remote paginated source.
    pub const SECONDARY: Language = Language::English;

    /// Returns the short code used on the wire.
    pub fn code(self) -> &'static str {
        match self {
            Language::Georgian => "ge",
            Language::English => "en",
        }
    }

    /// Parses a wire code, accepting the ISO `ka` alias for Georgian.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "ge" | "ka" => Some(Language::Georgian),
            "en" => Some(Language::English),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Chapter number, possibly fractional (`10.5`).
///
/// Equality is strict numeric equality: `10.5` and `10.50` are the same
/// chapter, `10.5` and `10.500001` are not. `-0.0` is normalised to `0.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterNumber(f64);

impl ChapterNumber {
    /// Creates a chapter number, rejecting NaN and infinities.
    pub fn new(value: f64) -> Option<Self> {
        value
            .is_finite()
            .then(|| Self(if value == 0.0 { 0.0 } else { value }))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    fn key(self) -> u64 {
        if self.0 == 0.0 { 0 } else { self.0.to_bits() }
    }
}

impl PartialEq for ChapterNumber {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ChapterNumber {}

impl Hash for ChapterNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for ChapterNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChapterNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            Ordering::Equal
        } else {
            self.0.total_cmp(&other.0)
        }
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One readable unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub number: ChapterNumber,
    #[serde(default)]
    pub title: String,
    pub language: Language,
    /// Ordered page image references.
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    /// True when the chapter was backfilled from the remote source.
    #[serde(default)]
    pub external: bool,
}

impl Chapter {
    /// Identity of a chapter within a content item.
    pub fn dedup_key(&self) -> (Language, ChapterNumber) {
        (self.language, self.number)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Filter applied to the resolved chapter list by the reading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanguageFilter {
    #[default]
    All,
    Only(Language),
}

impl LanguageFilter {
    pub fn matches(self, chapter: &Chapter) -> bool {
        match self {
            LanguageFilter::All => true,
            LanguageFilter::Only(language) => chapter.language == language,
        }
    }

    /// Returns the chapters passing this filter, order preserved.
    pub fn apply(self, chapters: &[Chapter]) -> Vec<Chapter> {
        chapters
            .iter()
            .filter(|chapter| self.matches(chapter))
            .cloned()
            .collect()
    }
}

/// The single persisted bookmark for a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub content_id: String,
    pub chapter_id: String,
    pub chapter_number: ChapterNumber,
    #[serde(default)]
    pub chapter_title: String,
    /// 1-based page the reader is on.
    pub current_page: u32,
    pub total_pages: u32,
    /// Unix timestamp in milliseconds.
    pub last_read_at: u64,
    #[serde(default)]
    pub content_title: String,
    #[serde(default)]
    pub content_thumbnail: Option<String>,
}

impl ReadingProgress {
    /// Percentage of the chapter read, `round(100 * current / total)` clamped to 0..=100.
    pub fn percent(&self) -> u8 {
        if self.total_pages == 0 {
            return 0;
        }
        let ratio = f64::from(self.current_page) / f64::from(self.total_pages);
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// Page layout of the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadingMode {
    #[default]
    SinglePage,
    DoublePage,
    LongStrip,
}

impl ReadingMode {
    pub fn is_paged(self) -> bool {
        !matches!(self, ReadingMode::LongStrip)
    }
}

/// Reading direction for paged modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingDirection {
    #[default]
    Ltr,
    Rtl,
}

/// How a page image is fitted into the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FitMode {
    #[default]
    Contain,
    Cover,
    Overflow,
    TrueSize,
}

/// Whether small images are stretched up to the fit box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StretchMode {
    #[default]
    None,
    Stretch,
}

/// Reader preferences. Persisted as a whole object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderSettings {
    pub mode: ReadingMode,
    pub direction: ReadingDirection,
    pub fit: FitMode,
    pub stretch: StretchMode,
    pub show_page_gap: bool,
    pub show_strip_gap: bool,
    pub show_progress_bar: bool,
    pub show_bottom_bar: bool,
    pub show_page_numbers: bool,
    pub auto_hide_controls: bool,
    pub auto_scroll_speed: f64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            mode: ReadingMode::SinglePage,
            direction: ReadingDirection::Ltr,
            fit: FitMode::Contain,
            stretch: StretchMode::None,
            show_page_gap: true,
            show_strip_gap: false,
            show_progress_bar: true,
            show_bottom_bar: true,
            show_page_numbers: true,
            auto_hide_controls: true,
            auto_scroll_speed: 1.0,
        }
    }
}

impl ReaderSettings {
    /// Clamps out-of-range values loaded from storage.
    pub fn normalized(mut self) -> Self {
        self.auto_scroll_speed = clamp_speed(self.auto_scroll_speed);
        self
    }
}

/// Clamps an auto-scroll multiplier into the supported range.
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_AUTO_SCROLL_SPEED, MAX_AUTO_SCROLL_SPEED)
}
