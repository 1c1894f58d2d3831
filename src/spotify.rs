use std::collections::HashMap;

use async_trait::async_trait;
use rspotify::clients::{BaseClient, OAuthClient};
use rspotify::model::{PlayableId, PlaylistId, SearchResult, SearchType, TrackId, UserId};
use rspotify::prelude::Id;
use rspotify::AuthCodeSpotify;
use tracing::debug;
use url::Url;

use crate::errors::SyncError;

/// The bits of a playlist the reconciler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
}

/// Destination playlist operations, one account.
#[async_trait]
pub trait PlaylistClient {
    async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>, SyncError>;

    async fn create_playlist(
        &self,
        name: &str,
        public: bool,
        description: &str,
    ) -> Result<PlaylistSummary, SyncError>;

    /// Top hit for `query` as a track URI, if any.
    async fn search_track(&self, query: &str) -> Result<Option<String>, SyncError>;

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<(), SyncError>;
}

/// `PlaylistClient` backed by an authorized rspotify client.
pub struct SpotifyPlaylists {
    spotify: AuthCodeSpotify,
    user_id: UserId<'static>,
}

impl SpotifyPlaylists {
    pub async fn new(spotify: AuthCodeSpotify) -> Result<Self, SyncError> {
        let me = spotify.me().await?;
        debug!(user = %me.id.id(), "spotify.user");
        Ok(Self {
            spotify,
            user_id: me.id,
        })
    }
}

/// Offset of the next page, read back out of Spotify's `next` link.
fn next_offset(next: Option<&str>) -> Result<Option<u32>, SyncError> {
    let Some(next_url) = next else {
        return Ok(None);
    };
    let url = Url::parse(next_url).map_err(|e| SyncError::Parse(format!("next url: {e}")))?;
    let query_pairs = url.query_pairs().into_owned().collect::<HashMap<String, String>>();
    match query_pairs.get("offset") {
        Some(offset) => offset
            .parse::<u32>()
            .map(Some)
            .map_err(|e| SyncError::Parse(format!("next offset {offset}: {e}"))),
        None => Ok(None),
    }
}

#[async_trait]
impl PlaylistClient for SpotifyPlaylists {
    async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>, SyncError> {
        let limit = 50;
        let mut offset = 0;
        let mut playlists = Vec::new();

        loop {
            let page = self
                .spotify
                .current_user_playlists_manual(Some(limit), Some(offset))
                .await?;

            playlists.extend(page.items.into_iter().map(|p| PlaylistSummary {
                id: p.id.id().to_string(),
                name: p.name,
            }));

            match next_offset(page.next.as_deref())? {
                Some(next) => offset = next,
                None => break,
            }
        }

        Ok(playlists)
    }

    async fn create_playlist(
        &self,
        name: &str,
        public: bool,
        description: &str,
    ) -> Result<PlaylistSummary, SyncError> {
        let playlist = self
            .spotify
            .user_playlist_create(
                self.user_id.as_ref(),
                name,
                Some(public),
                Some(false),
                Some(description),
            )
            .await?;

        Ok(PlaylistSummary {
            id: playlist.id.id().to_string(),
            name: playlist.name,
        })
    }

    async fn search_track(&self, query: &str) -> Result<Option<String>, SyncError> {
        let result = self
            .spotify
            .search(query, SearchType::Track, None, None, Some(1), None)
            .await?;

        match result {
            SearchResult::Tracks(tracks) => Ok(tracks
                .items
                .into_iter()
                .next()
                .and_then(|track| track.id)
                .map(|id| id.uri())),
            _ => Ok(None),
        }
    }

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<(), SyncError> {
        let playlist_id = PlaylistId::from_id(playlist_id)
            .map_err(|e| SyncError::Parse(format!("playlist id {playlist_id}: {e}")))?;

        let playable_ids = uris
            .iter()
            .map(|uri| {
                TrackId::from_uri(uri)
                    .map(PlayableId::Track)
                    .map_err(|e| SyncError::Parse(format!("track uri {uri}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.spotify
            .playlist_add_items(playlist_id, playable_ids, None)
            .await?;
        Ok(())
    }
}
