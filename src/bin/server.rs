//! Standalone sync server binary
//!
//! Configuration comes from the environment: `UNISON_ADDR` for the listen
//! address, `UNISON_LOG` for the tracing filter.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use unison::types::TrackMetadata;
use unison::{NoCleanup, ServerConfig, StaticSampleLibrary, SyncServer, Track};

/// Seed tracks served to freshly created sessions.
fn sample_tracks() -> Vec<Track> {
    let mut tracks = Vec::new();
    for (file, title, artist) in [
        ("ambient-dawn.mp3", "Ambient Dawn", "Unison"),
        ("tape-loops.mp3", "Tape Loops", "Unison"),
        ("night-drive.mp3", "Night Drive", "Unison"),
    ] {
        let mut metadata = TrackMetadata::new();
        metadata.insert("artist".to_string(), artist.into());
        metadata.insert("type".to_string(), "sample".into());
        tracks.push(
            Track::new(format!("/audio/uploads/samples/{file}"), title).with_metadata(metadata),
        );
    }
    tracks
}

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_env("UNISON_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = std::env::var("UNISON_ADDR").unwrap_or_else(|_| "0.0.0.0:7340".to_string());
    let config = ServerConfig::with_addr(addr);

    let mut server = SyncServer::new(
        config,
        Arc::new(StaticSampleLibrary::new(sample_tracks())),
        Arc::new(NoCleanup),
    );

    match server.start().await {
        Ok(addr) => tracing::info!(%addr, "unison server running"),
        Err(e) => {
            tracing::error!("failed to start: {e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("signal wait failed: {e}");
    }
    tracing::info!("shutting down");
    server.stop().await;
}
