use std::fs;
use std::io::stdin;

use rspotify::prelude::{BaseClient, OAuthClient};
use rspotify::{scopes, AuthCodeSpotify, Credentials, OAuth, Token};
use tracing::{info, warn};
use url::Url;

use crate::config::SpotifyConfig;
use crate::errors::SyncError;

fn build_client(cfg: &SpotifyConfig) -> Result<AuthCodeSpotify, SyncError> {
    let scopes = scopes!(
        "playlist-read-private",
        "playlist-modify-public",
        "playlist-modify-private"
    );

    let mut oauth = OAuth::default();
    oauth.scopes = scopes;
    oauth.redirect_uri = cfg.redirect_uri.clone();

    let creds = Credentials::new(&cfg.client_id, &cfg.client_secret);

    if let Some(dir) = cfg.token_cache_path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let config = rspotify::Config {
        token_cached: true,
        token_refreshing: true,
        cache_path: cfg.token_cache_path.clone(),
        ..Default::default()
    };

    Ok(AuthCodeSpotify::with_config(creds, oauth, config))
}

async fn set_token(spotify: &AuthCodeSpotify, token: Token) -> Result<(), SyncError> {
    *spotify
        .token
        .lock()
        .await
        .map_err(|_| SyncError::Auth("token lock poisoned".to_string()))? = Some(token);
    Ok(())
}

/// Authorized client for a scheduled run: a configured refresh token wins,
/// then the token cache, then the interactive browser flow.
pub async fn get_spotify_client(cfg: &SpotifyConfig) -> Result<AuthCodeSpotify, SyncError> {
    let spotify = build_client(cfg)?;

    if let Some(refresh_token) = &cfg.refresh_token {
        let token = Token {
            refresh_token: Some(refresh_token.clone()),
            ..Default::default()
        };
        set_token(&spotify, token).await?;
        spotify.refresh_token().await?;
        info!("spotify.auth.refreshed");
        return Ok(spotify);
    }

    match spotify.read_token_cache(true).await {
        Ok(Some(token)) => {
            set_token(&spotify, token).await?;
            info!(cache = %cfg.token_cache_path.display(), "spotify.auth.cached");
        }
        Ok(None) => {
            handle_authorization_flow(&spotify).await?;
        }
        Err(e) => {
            warn!(error = %e, "spotify.auth.cache_unreadable");
            handle_authorization_flow(&spotify).await?;
        }
    }

    Ok(spotify)
}

/// Runs the browser flow unconditionally and returns the resulting token.
pub async fn authorize_interactively(cfg: &SpotifyConfig) -> Result<Token, SyncError> {
    let spotify = build_client(cfg)?;
    handle_authorization_flow(&spotify).await?;

    let guard = spotify
        .token
        .lock()
        .await
        .map_err(|_| SyncError::Auth("token lock poisoned".to_string()))?;
    guard
        .clone()
        .ok_or_else(|| SyncError::Auth("no token after authorization".to_string()))
}

fn code_from_redirect(redirect: &str) -> Result<String, SyncError> {
    let url = Url::parse(redirect.trim())
        .map_err(|e| SyncError::Auth(format!("redirect url: {e}")))?;

    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.trim().to_string())
        .filter(|code| !code.is_empty())
        .ok_or_else(|| SyncError::Auth("redirect url has no code parameter".to_string()))
}

async fn handle_authorization_flow(spotify: &AuthCodeSpotify) -> Result<(), SyncError> {
    let auth_url = spotify.get_authorize_url(true)?;

    if webbrowser::open(&auth_url).is_err() {
        println!(
            "Failed to open the authorization URL. Please visit the URL manually: {}",
            auth_url
        );
    }

    println!("Enter redirected url:");
    let mut url_input = String::new();
    stdin().read_line(&mut url_input)?;

    let code = code_from_redirect(&url_input)?;
    spotify.request_token(&code).await?;

    Ok(())
}
