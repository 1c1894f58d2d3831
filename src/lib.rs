//! Mirrors new Beatport releases into a dated Spotify playlist, one
//! incremental scan per run.

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod logging;
pub mod normalize;
pub mod reconciler;
pub mod scanner;
pub mod spotify;
pub mod spotify_auth;
pub mod sync;
pub mod types;
pub mod web_scraper;

pub use errors::SyncError;
