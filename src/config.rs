use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use url::Url;

use crate::errors::SyncError;

pub const DEFAULT_BOOTSTRAP_DATE: &str = "2025-03-07";
pub const DEFAULT_CHECKPOINT_PATH: &str = "last_scan.json";
pub const DEFAULT_BEATPORT_BASE: &str = "https://www.beatport.com";
pub const DEFAULT_PAGE_SIZE: u32 = 150;
pub const DEFAULT_MAX_PAGES: u32 = 50;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PLAYLIST_SUFFIX: &str = "Beatport New Releases";
pub const DEFAULT_NOISE_PHRASES: [&str; 3] = ["Original Mix", "Extended Mix", "Extended Version"];
pub const DEFAULT_LABELS: [&str; 2] = ["Remix", "Instrumental"];

pub const HTTP_TIMEOUT: u64 = 15000;
pub const HTTP_MAX_RETRIES: usize = 3;
pub const HTTP_BACKOFF: u64 = 500;

/// Wrapper over env::var to return a config error for missing keys
fn env_check(key: &str) -> Result<String, SyncError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SyncError::Config(format!("{key} was not set"))),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parses an optional key, falling back to `default` when it is absent.
/// A present but malformed value is an error rather than a silent default.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, SyncError> {
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| SyncError::Config(format!("{key} invalid: {raw}"))),
        None => Ok(default),
    }
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env_opt(key) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn parse_iso_date(key: &str, raw: &str) -> Result<NaiveDate, SyncError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| SyncError::Config(format!("{key} is not YYYY-MM-DD: {e}")))
}

/// Source catalog (Beatport) settings
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: Url,
    pub session_cookie: Option<String>,
    pub page_size: u32,
    pub max_pages: u32,
}

fn build_source() -> Result<SourceConfig, SyncError> {
    let base = env_opt("BEATPORT_BASE_URL").unwrap_or_else(|| DEFAULT_BEATPORT_BASE.to_string());
    let base_url = Url::parse(&base)
        .map_err(|e| SyncError::Config(format!("BEATPORT_BASE_URL invalid {e}")))?;

    let page_size = env_parse("BEATPORT_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
    let max_pages = env_parse("SCAN_MAX_PAGES", DEFAULT_MAX_PAGES)?;
    if page_size == 0 || max_pages == 0 {
        return Err(SyncError::Config(
            "BEATPORT_PAGE_SIZE and SCAN_MAX_PAGES must be positive".to_string(),
        ));
    }

    Ok(SourceConfig {
        base_url,
        session_cookie: env_opt("BEATPORT_SESSION_COOKIE"),
        page_size,
        max_pages,
    })
}

/// Credentials and token cache for the Spotify OAuth flow
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub refresh_token: Option<String>,
    pub token_cache_path: PathBuf,
}

pub fn build_spotify() -> Result<SpotifyConfig, SyncError> {
    let client_id = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;
    let redirect_uri = env_opt("SPOTIFY_REDIRECT_URI")
        .unwrap_or_else(|| "http://localhost:8888/callback".to_string());
    Url::parse(&redirect_uri)
        .map_err(|e| SyncError::Config(format!("SPOTIFY_REDIRECT_URI invalid {e}")))?;

    let token_cache_path = env_opt("SPOTIFY_TOKEN_CACHE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("spotify_cache/.spotify_token_cache.json"));

    Ok(SpotifyConfig {
        client_id,
        client_secret,
        redirect_uri,
        refresh_token: env_opt("SPOTIFY_REFRESH_TOKEN"),
        token_cache_path,
    })
}

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    pub bootstrap: NaiveDate,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            bootstrap: NaiveDate::parse_from_str(DEFAULT_BOOTSTRAP_DATE, "%Y-%m-%d")
                .expect("default bootstrap date is valid"),
        }
    }
}

fn build_checkpoint() -> Result<CheckpointConfig, SyncError> {
    let path = env_opt("CHECKPOINT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH));
    let bootstrap = match env_opt("BOOTSTRAP_DATE") {
        Some(raw) => parse_iso_date("BOOTSTRAP_DATE", &raw)?,
        None => CheckpointConfig::default().bootstrap,
    };
    Ok(CheckpointConfig { path, bootstrap })
}

/// Phrases stripped from titles and labels allowed as a `(Label)` suffix
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub noise_phrases: Vec<String>,
    pub allowed_labels: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            noise_phrases: DEFAULT_NOISE_PHRASES.iter().map(|s| s.to_string()).collect(),
            allowed_labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn build_normalizer() -> NormalizerConfig {
    NormalizerConfig {
        noise_phrases: env_list("NOISE_PHRASES", &DEFAULT_NOISE_PHRASES),
        allowed_labels: env_list("LABEL_ALLOW_LIST", &DEFAULT_LABELS),
    }
}

#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    pub name_suffix: String,
    pub public: bool,
    pub description: String,
    pub batch_size: usize,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            name_suffix: DEFAULT_PLAYLIST_SUFFIX.to_string(),
            public: false,
            description: "New releases from My Beatport".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn build_playlist() -> Result<PlaylistConfig, SyncError> {
    let defaults = PlaylistConfig::default();
    let batch_size = env_parse("PLAYLIST_BATCH_SIZE", defaults.batch_size)?;
    if batch_size == 0 {
        return Err(SyncError::Config("PLAYLIST_BATCH_SIZE must be positive".to_string()));
    }
    Ok(PlaylistConfig {
        name_suffix: env_opt("PLAYLIST_SUFFIX").unwrap_or(defaults.name_suffix),
        public: env_parse("PLAYLIST_PUBLIC", defaults.public)?,
        description: env_opt("PLAYLIST_DESCRIPTION").unwrap_or(defaults.description),
        batch_size,
    })
}

/// Timeouts and retry policy for source page fetches
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: usize,
    pub backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(HTTP_TIMEOUT),
            max_retries: HTTP_MAX_RETRIES,
            backoff: Duration::from_millis(HTTP_BACKOFF),
        }
    }
}

fn build_http() -> Result<HttpConfig, SyncError> {
    Ok(HttpConfig {
        timeout: Duration::from_millis(env_parse("HTTP_TIMEOUT_MS", HTTP_TIMEOUT)?),
        max_retries: env_parse("HTTP_MAX_RETRIES", HTTP_MAX_RETRIES)?,
        backoff: Duration::from_millis(env_parse("HTTP_BACKOFF_MS", HTTP_BACKOFF)?),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,spotify_release_sync=debug,reqwest=warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let format = match env_opt("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
        Some(f) if f == "json" => LogFormat::Json,
        _ => LogFormat::Pretty,
    };
    LoggingConfig {
        format,
        ..LoggingConfig::default()
    }
}

///
/// Everything a run needs, loaded once at startup and passed down.
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub spotify: SpotifyConfig,
    pub checkpoint: CheckpointConfig,
    pub normalizer: NormalizerConfig,
    pub playlist: PlaylistConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

pub fn load_config() -> Result<AppConfig, SyncError> {
    dotenv::dotenv().ok();

    let source = build_source()?;
    let spotify = build_spotify()?;
    let checkpoint = build_checkpoint()?;
    let normalizer = build_normalizer();
    let playlist = build_playlist()?;
    let http = build_http()?;
    let logging = build_logging();

    Ok(AppConfig {
        source,
        spotify,
        checkpoint,
        normalizer,
        playlist,
        http,
        logging,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let checkpoint = CheckpointConfig::default();
        assert_eq!(checkpoint.bootstrap.to_string(), DEFAULT_BOOTSTRAP_DATE);
        assert_eq!(checkpoint.path, PathBuf::from("last_scan.json"));

        let playlist = PlaylistConfig::default();
        assert_eq!(playlist.batch_size, 100);

        let normalizer = NormalizerConfig::default();
        assert_eq!(normalizer.noise_phrases.len(), 3);
        assert_eq!(normalizer.allowed_labels, vec!["Remix", "Instrumental"]);
    }

    #[test]
    fn iso_dates_are_validated() {
        assert!(parse_iso_date("X", "2025-03-07").is_ok());
        assert!(matches!(
            parse_iso_date("X", "07/03/2025"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn missing_optional_keys_use_defaults() {
        let v: u32 = env_parse("SPOTIFY_RELEASE_SYNC_TEST_UNSET_KEY", 7).unwrap();
        assert_eq!(v, 7);
        let list = env_list("SPOTIFY_RELEASE_SYNC_TEST_UNSET_LIST", &["a", "b"]);
        assert_eq!(list, vec!["a", "b"]);
    }
}
