use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::{next_watermark, CheckpointLock, CheckpointStore, Watermark};
use crate::config::PlaylistConfig;
use crate::errors::SyncError;
use crate::normalize::TitleNormalizer;
use crate::reconciler::{Reconciler, SyncReport};
use crate::scanner::{ScanLimits, ScanOutcome, Scanner};
use crate::spotify::PlaylistClient;
use crate::web_scraper::{Fetcher, RowParser};

/// What one run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub previous_watermark: Watermark,
    pub scan: ScanOutcome,
    /// `None` when the scan found nothing and the destination was not touched.
    pub report: Option<SyncReport>,
    /// The watermark written to the checkpoint, if it moved.
    pub saved_watermark: Option<Watermark>,
}

/// One scan-then-reconcile pass. The checkpoint is only written after the
/// reconciler returns, so an aborted or cancelled run leaves it as it was.
pub struct SyncJob<'a, F: ?Sized, P: ?Sized, C: ?Sized> {
    pub fetcher: &'a F,
    pub parser: &'a P,
    pub client: &'a C,
    pub normalizer: &'a TitleNormalizer,
    pub store: &'a CheckpointStore,
    pub limits: ScanLimits,
    pub playlist: &'a PlaylistConfig,
}

impl<'a, F, P, C> SyncJob<'a, F, P, C>
where
    F: Fetcher + Sync + ?Sized,
    P: RowParser + ?Sized,
    C: PlaylistClient + Sync + ?Sized,
{
    /// Checkpoint watermark, or the bootstrap date when the file is corrupt.
    fn starting_watermark(&self) -> Result<Watermark, SyncError> {
        match self.store.load() {
            Ok(w) => Ok(w),
            Err(SyncError::CorruptCheckpoint(reason)) => {
                let fallback = self.store.bootstrap();
                warn!(%reason, fallback = %fallback, "checkpoint.corrupt");
                Ok(fallback)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn run(
        &self,
        today: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SyncError> {
        let _lock = CheckpointLock::acquire(self.store.path())?;

        let watermark = self.starting_watermark()?;
        let scan = Scanner::new(self.fetcher, self.parser, self.normalizer, self.limits)
            .scan(watermark, cancel)
            .await?;

        if scan.records.is_empty() {
            info!(watermark = %watermark, stop = ?scan.stop, "sync.nothing_new");
            return Ok(RunSummary {
                previous_watermark: watermark,
                scan,
                report: None,
                saved_watermark: None,
            });
        }

        let report = Reconciler::new(self.client, self.playlist)
            .reconcile(&scan.records, today, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let nothing_landed = report.added == 0 && report.is_partial();
        let saved_watermark = match next_watermark(&scan.records) {
            // Every batch failed: keep the old watermark so the next run
            // picks the same releases up again.
            Some(_) if nothing_landed => {
                warn!(
                    failed_batches = report.failed_batches.len(),
                    "sync.watermark_held: no batch reached the playlist"
                );
                None
            }
            Some(next) if next > watermark => {
                self.store.save(&next)?;
                Some(next)
            }
            Some(_) => None,
            None => {
                warn!(
                    records = scan.records.len(),
                    "sync.watermark_unchanged: no record carried a usable release date"
                );
                None
            }
        };

        if report.is_partial() {
            warn!(
                failed_batches = report.failed_batches.len(),
                added = report.added,
                "sync.partial"
            );
        }

        Ok(RunSummary {
            previous_watermark: watermark,
            scan,
            report: Some(report),
            saved_watermark,
        })
    }
}
