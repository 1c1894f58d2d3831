use std::time::Duration;

use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::{header, Client};
use scraper::{ElementRef, Html, Selector};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::config::{HttpConfig, SourceConfig};
use crate::errors::SyncError;
use crate::types::RawRow;

/// Produces the raw content of one listing page.
#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, page: u32, page_size: u32) -> Result<String, SyncError>;
}

/// Turns raw page content into listing rows, in page order. Missing
/// sub-elements become `None`; a parser never fails a page.
pub trait RowParser {
    fn parse_rows(&self, content: &str) -> Vec<RawRow>;
}

/// Exponential backoff with a little jitter
fn generate_backoff(base: Duration, attempt: usize, rng: &mut SmallRng) -> Duration {
    let exp = base.saturating_mul(1_u32 << attempt.min(6));
    let jitter = Duration::from_millis(rng.gen_range(50..=200));
    exp + jitter
}

/// Fetches pages of the signed-in "My Beatport" feed.
#[derive(Debug, Clone)]
pub struct BeatportFetcher {
    http: Client,
    base: Url,
    retry: HttpConfig,
}

impl BeatportFetcher {
    pub fn new(source: &SourceConfig, http: &HttpConfig) -> Result<Self, SyncError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("text/html"));
        if let Some(cookie) = &source.session_cookie {
            headers.insert(
                header::COOKIE,
                header::HeaderValue::from_str(cookie)
                    .map_err(|e| SyncError::Config(format!("invalid session cookie: {e}")))?,
            );
        }

        let client = Client::builder()
            .timeout(http.timeout)
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("build client: {e}")))?;

        Ok(Self {
            http: client,
            base: source.base_url.clone(),
            retry: http.clone(),
        })
    }

    pub fn page_url(&self, page: u32, page_size: u32) -> Result<Url, SyncError> {
        let mut url = self
            .base
            .join("my-beatport")
            .map_err(|e| SyncError::Config(format!("page url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &page_size.to_string());
        Ok(url)
    }
}

#[async_trait]
impl Fetcher for BeatportFetcher {
    async fn fetch(&self, page: u32, page_size: u32) -> Result<String, SyncError> {
        let url = self.page_url(page, page_size)?;
        let mut rng = SmallRng::from_entropy();
        let mut attempt = 0_usize;

        loop {
            match self.http.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(page, status = %resp.status(), "source.page.fetched");
                    return Ok(resp.text().await?);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt >= self.retry.max_retries {
                        return Err(SyncError::FetchFailure(format!(
                            "GET {url}: status {status} after {attempt} retries"
                        )));
                    }
                    let backoff = generate_backoff(self.retry.backoff, attempt, &mut rng);
                    warn!(page, status = %status, backoff_ms = backoff.as_millis() as u64, "source.retry");
                    sleep(backoff).await;
                }
                Err(e) => {
                    if attempt >= self.retry.max_retries {
                        return Err(SyncError::FetchFailure(format!("GET {url}: {e}")));
                    }
                    let backoff = generate_backoff(self.retry.backoff, attempt, &mut rng);
                    warn!(page, error = %e, backoff_ms = backoff.as_millis() as u64, "source.retry.error");
                    sleep(backoff).await;
                }
            }
            attempt += 1;
        }
    }
}

/// Row parser for the Beatport tracks table markup.
#[derive(Debug)]
pub struct BeatportRowParser {
    base: Url,
    row: Selector,
    track: Selector,
    artist: Selector,
    date: Selector,
    label: Selector,
}

fn selector(css: &str) -> Result<Selector, SyncError> {
    Selector::parse(css).map_err(|e| SyncError::Parse(format!("selector {css}: {e:?}")))
}

fn text_of(element: ElementRef<'_>) -> Option<String> {
    let text = element.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

impl BeatportRowParser {
    pub fn new(base: &Url) -> Result<Self, SyncError> {
        Ok(Self {
            base: base.clone(),
            row: selector(r#"div[data-testid="tracks-table-row"]"#)?,
            track: selector(r#"a[href*="/track/"]"#)?,
            artist: selector(r#"a[href*="/artist/"]"#)?,
            date: selector(r#"[class*="cell date"]"#)?,
            label: selector(r#"span[class*="ReleaseName"]"#)?,
        })
    }

    fn absolute(&self, element: ElementRef<'_>) -> Option<String> {
        let href = element.value().attr("href")?;
        self.base.join(href).ok().map(|u| u.to_string())
    }
}

impl RowParser for BeatportRowParser {
    fn parse_rows(&self, content: &str) -> Vec<RawRow> {
        let document = Html::parse_document(content);

        document
            .select(&self.row)
            .map(|row| {
                let track = row.select(&self.track).next();
                let artist = row.select(&self.artist).next();

                RawRow {
                    title: track.and_then(text_of),
                    label: row.select(&self.label).next().and_then(text_of),
                    artist: artist.and_then(text_of),
                    track_url: track.and_then(|t| self.absolute(t)),
                    artist_url: artist.and_then(|a| self.absolute(a)),
                    release_date: row.select(&self.date).next().and_then(text_of),
                }
            })
            .collect()
    }
}
