use serde::{Deserialize, Serialize};

pub const UNKNOWN_TRACK: &str = "Unknown Track";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_DATE: &str = "Unknown Date";
pub const NO_LINK: &str = "N/A";

/// One listing row as the source parser found it. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub title: Option<String>,
    pub label: Option<String>,
    pub artist: Option<String>,
    pub track_url: Option<String>,
    pub artist_url: Option<String>,
    pub release_date: Option<String>,
}

/// A new release discovered by a scan, title already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub title: String,
    pub artist: String,
    pub source_track_url: String,
    pub artist_url: String,
    pub release_date: String,
}

impl ReleaseRecord {
    /// Case-insensitive key used to drop repeated listings within a scan.
    pub fn dedup_key(&self) -> String {
        self.title.to_lowercase()
    }

    /// Query sent to the destination catalog search.
    pub fn search_query(&self) -> String {
        format!("{} {}", self.title, self.artist)
    }
}

impl std::fmt::Display for ReleaseRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} by {} (Released: {}) -> {}",
            self.title, self.artist, self.release_date, self.source_track_url
        )
    }
}
