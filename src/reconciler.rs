use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PlaylistConfig;
use crate::errors::SyncError;
use crate::spotify::PlaylistClient;
use crate::types::ReleaseRecord;

/// Playlist a run writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistTarget {
    pub name: String,
    pub id: String,
    pub exists_already: bool,
}

/// An add-tracks call that failed. Earlier batches stay in the playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub uris: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub playlist_id: String,
    pub playlist_name: String,
    pub playlist_was_created: bool,
    pub added: usize,
    pub unmatched: Vec<ReleaseRecord>,
    pub failed_batches: Vec<BatchFailure>,
}

impl SyncReport {
    pub fn is_partial(&self) -> bool {
        !self.failed_batches.is_empty()
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Playlist '{}' ({}){}",
            self.playlist_name,
            self.playlist_id,
            if self.playlist_was_created { " [created]" } else { "" }
        )?;
        writeln!(f, "Added {} tracks", self.added)?;
        if !self.unmatched.is_empty() {
            writeln!(f, "Songs not found:")?;
            for record in &self.unmatched {
                writeln!(f, "  Artist: {}, Title: {}", record.artist, record.title)?;
            }
        }
        for failure in &self.failed_batches {
            writeln!(
                f,
                "Batch {} ({} tracks) failed: {}",
                failure.batch_index,
                failure.uris.len(),
                failure.error
            )?;
        }
        Ok(())
    }
}

/// Same calendar day, same name: `yy/mm/dd <suffix>`.
pub fn playlist_name(today: NaiveDate, suffix: &str) -> String {
    format!("{} {}", today.format("%y/%m/%d"), suffix.trim())
}

/// Mirrors scanned records into the dated destination playlist.
pub struct Reconciler<'a, C: ?Sized> {
    client: &'a C,
    cfg: &'a PlaylistConfig,
}

impl<'a, C> Reconciler<'a, C>
where
    C: PlaylistClient + Sync + ?Sized,
{
    pub fn new(client: &'a C, cfg: &'a PlaylistConfig) -> Self {
        Self { client, cfg }
    }

    /// Reuses the first playlist with the derived name, creating it only if
    /// none exists.
    pub async fn lookup_or_create(&self, today: NaiveDate) -> Result<PlaylistTarget, SyncError> {
        let name = playlist_name(today, &self.cfg.name_suffix);

        let existing = self
            .client
            .list_playlists()
            .await?
            .into_iter()
            .find(|p| p.name == name);

        if let Some(playlist) = existing {
            info!(playlist = %name, id = %playlist.id, "playlist.reused");
            return Ok(PlaylistTarget {
                name,
                id: playlist.id,
                exists_already: true,
            });
        }

        let created = self
            .client
            .create_playlist(&name, self.cfg.public, &self.cfg.description)
            .await?;
        info!(playlist = %name, id = %created.id, "playlist.created");
        Ok(PlaylistTarget {
            name,
            id: created.id,
            exists_already: false,
        })
    }

    pub async fn reconcile(
        &self,
        records: &[ReleaseRecord],
        today: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let target = self.lookup_or_create(today).await?;

        let mut uris = Vec::with_capacity(records.len());
        let mut unmatched = Vec::new();

        for record in records {
            let query = record.search_query();
            match self.client.search_track(&query).await {
                Ok(Some(uri)) => uris.push(uri),
                Ok(None) => {
                    warn!(query = %query, "search.unmatched");
                    unmatched.push(record.clone());
                }
                // An expired token or a rate limit is not a miss. Nothing
                // has been added yet, so aborting leaves a clean retry.
                Err(e) => {
                    warn!(query = %query, error = %e, "search.failed");
                    return Err(e);
                }
            }
        }

        let mut added = 0;
        let mut failed_batches = Vec::new();

        for (batch_index, chunk) in uris.chunks(self.cfg.batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match self.client.add_tracks(&target.id, chunk).await {
                Ok(()) => {
                    info!(batch = batch_index, size = chunk.len(), "playlist.batch.added");
                    added += chunk.len();
                }
                Err(e) => {
                    warn!(batch = batch_index, size = chunk.len(), error = %e, "playlist.batch.failed");
                    failed_batches.push(BatchFailure {
                        batch_index,
                        uris: chunk.to_vec(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(SyncReport {
            playlist_id: target.id,
            playlist_name: target.name,
            playlist_was_created: !target.exists_already,
            added,
            unmatched,
            failed_batches,
        })
    }
}
