use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::Watermark;
use crate::errors::SyncError;
use crate::normalize::TitleNormalizer;
use crate::types::{RawRow, ReleaseRecord, NO_LINK, UNKNOWN_ARTIST, UNKNOWN_DATE, UNKNOWN_TRACK};
use crate::web_scraper::{Fetcher, RowParser};

/// Why a scan finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    /// A row at or before the watermark was reached.
    ReachedWatermark,
    /// Page 1 had no rows at all.
    EmptyFirstPage,
    /// Ran out of rows after at least one non-empty page without ever
    /// reaching the watermark. Legitimate for a short feed, but also what a
    /// markup change looks like.
    SourceExhausted,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub records: Vec<ReleaseRecord>,
    pub pages_fetched: u32,
    pub stop: ScanStop,
}

#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub page_size: u32,
    pub max_pages: u32,
}

/// Walks the newest-first listing until it meets the watermark.
pub struct Scanner<'a, F: ?Sized, P: ?Sized> {
    fetcher: &'a F,
    parser: &'a P,
    normalizer: &'a TitleNormalizer,
    limits: ScanLimits,
}

impl<'a, F, P> Scanner<'a, F, P>
where
    F: Fetcher + Sync + ?Sized,
    P: RowParser + ?Sized,
{
    pub fn new(
        fetcher: &'a F,
        parser: &'a P,
        normalizer: &'a TitleNormalizer,
        limits: ScanLimits,
    ) -> Self {
        Self {
            fetcher,
            parser,
            normalizer,
            limits,
        }
    }

    pub async fn scan(
        &self,
        watermark: Watermark,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, SyncError> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1_u32;

        info!(watermark = %watermark, page_size = self.limits.page_size, "scan.start");

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if page > self.limits.max_pages {
                return Err(SyncError::ScanExceededPageLimit(self.limits.max_pages));
            }

            let content = self.fetcher.fetch(page, self.limits.page_size).await?;
            let rows = self.parser.parse_rows(&content);
            debug!(page, rows = rows.len(), "scan.page");

            if rows.is_empty() {
                let stop = if page == 1 {
                    ScanStop::EmptyFirstPage
                } else {
                    warn!(
                        page,
                        collected = records.len(),
                        "scan.source_exhausted: listing ended before the watermark, check the row parser"
                    );
                    ScanStop::SourceExhausted
                };
                return Ok(self.finish(records, page, stop));
            }

            for row in rows {
                let date = row.release_date.as_deref().unwrap_or(UNKNOWN_DATE);
                if watermark.covers(date) {
                    debug!(page, release_date = date, "scan.reached_watermark");
                    return Ok(self.finish(records, page, ScanStop::ReachedWatermark));
                }

                let record = self.to_record(row);
                if seen.insert(record.dedup_key()) {
                    records.push(record);
                } else {
                    debug!(title = %record.title, "scan.duplicate_dropped");
                }
            }

            page += 1;
        }
    }

    fn to_record(&self, row: RawRow) -> ReleaseRecord {
        let RawRow {
            title,
            label,
            artist,
            track_url,
            artist_url,
            release_date,
        } = row;

        let raw_title = title.unwrap_or_else(|| UNKNOWN_TRACK.to_string());
        let title = self.normalizer.normalize_with_label(&raw_title, label.as_deref());

        ReleaseRecord {
            title: if title.is_empty() { raw_title } else { title },
            artist: artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            source_track_url: track_url.unwrap_or_else(|| NO_LINK.to_string()),
            artist_url: artist_url.unwrap_or_else(|| NO_LINK.to_string()),
            release_date: release_date.unwrap_or_else(|| UNKNOWN_DATE.to_string()),
        }
    }

    fn finish(&self, records: Vec<ReleaseRecord>, pages_fetched: u32, stop: ScanStop) -> ScanOutcome {
        info!(records = records.len(), pages_fetched, stop = ?stop, "scan.done");
        ScanOutcome {
            records,
            pages_fetched,
            stop,
        }
    }
}


#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::fakes::{FakeFetcher, JsonRows};
    use super::*;
    use crate::checkpoint::next_watermark;
    use crate::config::NormalizerConfig;

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, _page: u32, _page_size: u32) -> Result<String, SyncError> {
            Err(SyncError::FetchFailure("401 unauthorized".to_string()))
        }
    }

    fn row(title: &str, date: &str) -> RawRow {
        RawRow {
            title: Some(title.to_string()),
            label: None,
            artist: Some("Artist".to_string()),
            track_url: Some(format!("https://www.beatport.com/track/{title}/1")),
            artist_url: Some("https://www.beatport.com/artist/artist/1".to_string()),
            release_date: Some(date.to_string()),
        }
    }

    fn watermark(s: &str) -> Watermark {
        Watermark::new(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap())
    }

    fn limits(max_pages: u32) -> ScanLimits {
        ScanLimits {
            page_size: 150,
            max_pages,
        }
    }

    async fn run(fetcher: &FakeFetcher, w: &str, max_pages: u32) -> Result<ScanOutcome, SyncError> {
        let normalizer = TitleNormalizer::new(&NormalizerConfig::default()).unwrap();
        Scanner::new(fetcher, &JsonRows, &normalizer, limits(max_pages))
            .scan(watermark(w), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn stops_at_watermark_row() {
        let fetcher = FakeFetcher::new(vec![vec![
            row("A", "2025-03-10"),
            row("B", "2025-03-09"),
            row("C", "2025-03-05"),
            row("D", "2025-03-11"),
        ]]);

        let outcome = run(&fetcher, "2025-03-07", 50).await.unwrap();
        let dates: Vec<_> = outcome.records.iter().map(|r| r.release_date.as_str()).collect();
        assert_eq!(dates, vec!["2025-03-10", "2025-03-09"]);
        assert_eq!(outcome.stop, ScanStop::ReachedWatermark);
        assert_eq!(outcome.pages_fetched, 1);
        assert_eq!(fetcher.requested(), vec![1]);
        assert_eq!(next_watermark(&outcome.records).unwrap().to_string(), "2025-03-10");
    }

    #[tokio::test]
    async fn row_equal_to_watermark_stops() {
        let fetcher = FakeFetcher::new(vec![vec![row("A", "2025-03-08"), row("B", "2025-03-07")]]);
        let outcome = run(&fetcher, "2025-03-07", 50).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn rescan_with_new_watermark_is_empty() {
        let pages = vec![
            vec![row("A", "2025-03-12"), row("B", "2025-03-11")],
            vec![row("C", "2025-03-09"), row("D", "2025-03-01")],
        ];
        let first = run(&FakeFetcher::new(pages.clone()), "2025-03-07", 50).await.unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(first.pages_fetched, 2);

        let advanced = next_watermark(&first.records).unwrap();
        assert_eq!(advanced.to_string(), "2025-03-12");

        let second = run(&FakeFetcher::new(pages), &advanced.to_string(), 50).await.unwrap();
        assert!(second.records.is_empty());
        assert_eq!(second.stop, ScanStop::ReachedWatermark);
    }

    #[tokio::test]
    async fn empty_first_page_yields_nothing() {
        let fetcher = FakeFetcher::new(vec![]);
        let outcome = run(&fetcher, "2025-03-07", 50).await.unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stop, ScanStop::EmptyFirstPage);
        assert_eq!(outcome.pages_fetched, 1);
    }

    #[tokio::test]
    async fn exhausted_listing_is_flagged() {
        let fetcher = FakeFetcher::new(vec![vec![row("A", "2025-03-10")]]);
        let outcome = run(&fetcher, "2025-03-07", 50).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.stop, ScanStop::SourceExhausted);
        assert_eq!(fetcher.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn duplicate_titles_keep_first_occurrence() {
        let mut first = row("Sunrise (Original Mix)", "2025-03-10");
        first.artist = Some("First".to_string());
        let mut second = row("SUNRISE (Extended Mix)", "2025-03-10");
        second.artist = Some("Second".to_string());

        let fetcher = FakeFetcher::new(vec![vec![first, second, row("Other", "2025-03-01")]]);
        let outcome = run(&fetcher, "2025-03-07", 50).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].title, "Sunrise");
        assert_eq!(outcome.records[0].artist, "First");
    }

    #[tokio::test]
    async fn label_is_applied_before_dedup() {
        let plain = row("Sunrise", "2025-03-10");
        let mut remix = row("Sunrise", "2025-03-10");
        remix.label = Some("Remix".to_string());

        let fetcher = FakeFetcher::new(vec![vec![plain, remix, row("Old", "2025-01-01")]]);
        let outcome = run(&fetcher, "2025-03-07", 50).await.unwrap();
        let titles: Vec<_> = outcome.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Sunrise", "Sunrise (Remix)"]);
    }

    #[tokio::test]
    async fn malformed_row_gets_sentinels() {
        let bare = RawRow {
            release_date: Some("2025-03-10".to_string()),
            ..RawRow::default()
        };
        let fetcher = FakeFetcher::new(vec![vec![bare, row("Old", "2025-01-01")]]);
        let outcome = run(&fetcher, "2025-03-07", 50).await.unwrap();
        let record = &outcome.records[0];
        assert_eq!(record.title, UNKNOWN_TRACK);
        assert_eq!(record.artist, UNKNOWN_ARTIST);
        assert_eq!(record.source_track_url, NO_LINK);
        assert_eq!(record.artist_url, NO_LINK);
    }

    #[tokio::test]
    async fn missing_date_is_kept_but_not_used_for_watermark() {
        let mut undated = row("Undated", "x");
        undated.release_date = None;
        let fetcher = FakeFetcher::new(vec![vec![undated, row("Old", "2025-01-01")]]);
        let outcome = run(&fetcher, "2025-03-07", 50).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].release_date, UNKNOWN_DATE);
        assert!(next_watermark(&outcome.records).is_none());
    }

    #[tokio::test]
    async fn page_cap_is_enforced() {
        let pages = (0..5).map(|i| vec![row(&format!("T{i}"), "2025-03-10")]).collect();
        let fetcher = FakeFetcher::new(pages);
        let err = run(&fetcher, "2025-03-07", 3).await.unwrap_err();
        assert!(matches!(err, SyncError::ScanExceededPageLimit(3)));
        assert_eq!(fetcher.requested(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cancellation_checked_before_fetch() {
        let fetcher = FakeFetcher::new(vec![vec![row("A", "2025-03-10")]]);
        let normalizer = TitleNormalizer::new(&NormalizerConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Scanner::new(&fetcher, &JsonRows, &normalizer, limits(50))
            .scan(watermark("2025-03-07"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(fetcher.requested().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_propagates() {
        let normalizer = TitleNormalizer::new(&NormalizerConfig::default()).unwrap();
        let err = Scanner::new(&FailingFetcher, &JsonRows, &normalizer, limits(50))
            .scan(watermark("2025-03-07"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::FetchFailure(_)));
    }
}
