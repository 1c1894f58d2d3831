use chrono::Local;
use tokio_util::sync::CancellationToken;

use spotify_release_sync::checkpoint::CheckpointStore;
use spotify_release_sync::config;
use spotify_release_sync::logging;
use spotify_release_sync::normalize::TitleNormalizer;
use spotify_release_sync::scanner::ScanLimits;
use spotify_release_sync::spotify::SpotifyPlaylists;
use spotify_release_sync::spotify_auth::get_spotify_client;
use spotify_release_sync::sync::SyncJob;
use spotify_release_sync::web_scraper::{BeatportFetcher, BeatportRowParser};
use spotify_release_sync::SyncError;

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let cfg = config::load_config()?;
    let _guard = logging::init_logging(&cfg.logging)?;

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "starting");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping at the next page or batch");
            on_signal.cancel();
        }
    });

    let normalizer = TitleNormalizer::new(&cfg.normalizer)?;
    let fetcher = BeatportFetcher::new(&cfg.source, &cfg.http)?;
    let parser = BeatportRowParser::new(&cfg.source.base_url)?;
    let spotify = get_spotify_client(&cfg.spotify).await?;
    let playlists = SpotifyPlaylists::new(spotify).await?;
    let store = CheckpointStore::new(&cfg.checkpoint.path, cfg.checkpoint.bootstrap);

    let job = SyncJob {
        fetcher: &fetcher,
        parser: &parser,
        client: &playlists,
        normalizer: &normalizer,
        store: &store,
        limits: ScanLimits {
            page_size: cfg.source.page_size,
            max_pages: cfg.source.max_pages,
        },
        playlist: &cfg.playlist,
    };

    let summary = match job.run(Local::now().date_naive(), &cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "sync.failed");
            return Err(e);
        }
    };

    for record in &summary.scan.records {
        println!("{record}");
    }
    match &summary.report {
        Some(report) => print!("{report}"),
        None => println!("No new releases since {}", summary.previous_watermark),
    }
    if let Some(watermark) = summary.saved_watermark {
        println!("Checkpoint advanced to {watermark}");
    }

    tracing::info!(
        records = summary.scan.records.len(),
        pages = summary.scan.pages_fetched,
        partial = summary.report.as_ref().is_some_and(|r| r.is_partial()),
        "finished"
    );
    Ok(())
}
