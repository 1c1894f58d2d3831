use spotify_release_sync::config::build_spotify;
use spotify_release_sync::spotify_auth::authorize_interactively;
use spotify_release_sync::SyncError;

/// One-off helper: authorize in the browser and print the tokens so the
/// refresh token can be stored as SPOTIFY_REFRESH_TOKEN for scheduled runs.
#[tokio::main]
async fn main() -> Result<(), SyncError> {
    dotenv::dotenv().ok();
    let cfg = build_spotify()?;

    let token = authorize_interactively(&cfg).await?;
    println!("Access Token: {}", token.access_token);
    match token.refresh_token {
        Some(refresh) => println!("Refresh Token: {refresh}"),
        None => println!("No refresh token returned. Try re-authorizing the app."),
    }
    Ok(())
}
