//! Duel Lobby Server
//!
//! Reads configuration from the environment and serves until Ctrl-C.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use duel_lobby::network::{AuthConfig, GameServer, ServerConfig};
use duel_lobby::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("reading DUEL_* configuration")?;
    let auth = AuthConfig::from_env();

    info!("Duel Lobby Server v{}", VERSION);
    info!(
        "Turn duration: {}s, sweep every {}ms",
        config.turn_duration.as_secs(),
        config.tick_interval.as_millis()
    );

    let server = GameServer::build(config, auth)
        .await
        .context("initializing server")?;

    let serving = server.run();
    tokio::pin!(serving);

    tokio::select! {
        result = &mut serving => result.context("server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
            serving.await.context("server stopped")?;
        }
    }

    Ok(())
}
