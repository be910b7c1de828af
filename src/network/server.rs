//! WebSocket Duel Server
//!
//! Accepts WebSocket connections, authenticates them during the upgrade,
//! routes commands to the lobby and session managers and runs the turn
//! scheduler until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::core::rng::{RollSource, SharedRng};
use crate::core::store::{LobbyStore, SessionStore};
use crate::game::lobby::ConnectionId;
use crate::game::session::DEFAULT_TURN_DURATION;
use crate::network::auth::{resolve_display_name, AuthConfig};
use crate::network::hub::{ConnectionHub, IdentityResolver, NotificationDispatcher};
use crate::network::lobby_manager::LobbyManager;
use crate::network::profile::{FileProfileStore, ProfileError, ProfileStore};
use crate::network::protocol::{ClientMessage, MessagePayload, ServerMessage};
use crate::network::scheduler::TurnScheduler;
use crate::network::session_manager::{SessionConfig, SessionManager};
use crate::SCHEDULER_TICK;

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time a player has to move.
    pub turn_duration: Duration,
    /// Period of the timeout sweep.
    pub tick_interval: Duration,
    /// Nickname-to-avatar index. Without one, rosters carry no avatars.
    pub profiles_path: Option<PathBuf>,
    /// Directory avatar paths are resolved against.
    pub avatar_root: PathBuf,
    /// Fixed RNG seed; entropy-derived when unset.
    pub rng_seed: Option<u64>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            turn_duration: DEFAULT_TURN_DURATION,
            tick_interval: SCHEDULER_TICK,
            profiles_path: None,
            avatar_root: PathBuf::from("."),
            rng_seed: None,
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Read `DUEL_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, GameServerError> {
        let defaults = Self::default();

        Ok(Self {
            bind_addr: env_or("DUEL_BIND_ADDR", defaults.bind_addr)?,
            max_connections: env_or("DUEL_MAX_CONNECTIONS", defaults.max_connections)?,
            turn_duration: Duration::from_secs(env_or(
                "DUEL_TURN_DURATION_SECS",
                defaults.turn_duration.as_secs(),
            )?),
            tick_interval: Duration::from_millis(env_or(
                "DUEL_TICK_INTERVAL_MS",
                defaults.tick_interval.as_millis() as u64,
            )?),
            profiles_path: std::env::var("DUEL_PROFILES_PATH").ok().map(PathBuf::from),
            avatar_root: std::env::var("DUEL_AVATAR_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.avatar_root),
            rng_seed: match std::env::var("DUEL_RNG_SEED") {
                Ok(raw) => Some(parse_value("DUEL_RNG_SEED", &raw)?),
                Err(_) => None,
            },
            version: defaults.version,
        })
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, GameServerError> {
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, GameServerError> {
    raw.trim()
        .parse()
        .map_err(|_| GameServerError::InvalidConfig(format!("{}={:?}", name, raw)))
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Profile index could not be loaded.
    #[error("Profile store error: {0}")]
    Profiles(#[from] ProfileError),

    /// An environment variable did not parse.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Handles shared by every connection task.
#[derive(Clone)]
struct Shared {
    hub: Arc<ConnectionHub>,
    lobbies: Arc<LobbyManager>,
    sessions: Arc<SessionManager>,
    auth: Arc<AuthConfig>,
}

/// The duel server.
pub struct GameServer {
    config: ServerConfig,
    shared: Shared,
    scheduler: Arc<TurnScheduler>,
    /// One permit per accepted socket, held until its task ends.
    connection_slots: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Wire a server from its collaborators.
    pub fn new(
        config: ServerConfig,
        auth: AuthConfig,
        profiles: Arc<dyn ProfileStore>,
        rolls: Arc<dyn RollSource>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let hub = Arc::new(ConnectionHub::new());
        let lobby_store = Arc::new(LobbyStore::new());
        let session_store = Arc::new(SessionStore::new());
        let dispatcher: Arc<dyn NotificationDispatcher> = hub.clone();

        let lobbies = Arc::new(LobbyManager::new(lobby_store.clone(), dispatcher.clone(), profiles));
        let sessions = Arc::new(SessionManager::new(
            lobby_store.clone(),
            session_store.clone(),
            dispatcher.clone(),
            rolls,
            SessionConfig {
                turn_duration: config.turn_duration,
            },
        ));
        let scheduler = Arc::new(TurnScheduler::new(
            lobby_store,
            session_store,
            dispatcher,
            config.tick_interval,
        ));

        let connection_slots = Arc::new(Semaphore::new(config.max_connections));

        Self {
            config,
            shared: Shared {
                hub,
                lobbies,
                sessions,
                auth: Arc::new(auth),
            },
            scheduler,
            connection_slots,
            shutdown_tx,
        }
    }

    /// Load the profile index and seed the RNG as configured.
    pub async fn build(config: ServerConfig, auth: AuthConfig) -> Result<Self, GameServerError> {
        let profiles = match config.profiles_path {
            Some(ref path) => {
                let store = FileProfileStore::load(path, config.avatar_root.clone()).await?;
                info!(profiles = store.len(), "Loaded profile index from {}", path.display());
                store
            }
            None => FileProfileStore::default(),
        };

        let rolls = match config.rng_seed {
            Some(seed) => SharedRng::new(seed),
            None => SharedRng::from_entropy(),
        };

        Ok(Self::new(config, auth, Arc::new(profiles), Arc::new(rolls)))
    }

    /// Bind and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Duel server {} listening on {}", self.config.version, self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        if !self.shared.auth.is_configured() {
            warn!("Authentication not configured; accepting ?nickname= identities");
        }

        let scheduler = self.scheduler.clone();
        let scheduler_shutdown = self.shutdown_tx.subscribe();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Handshakes in progress count against the limit
                            let Ok(slot) = self.connection_slots.clone().try_acquire_owned() else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, slot);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = scheduler_handle.await {
            error!("Turn scheduler task failed: {}", e);
        }
        Ok(())
    }

    /// Upgrade, authenticate and serve one connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, slot: OwnedSemaphorePermit) {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            let mut identity = None;
            let authenticate = |request: &Request, response: Response| {
                match resolve_display_name(request.uri().query(), &shared.auth) {
                    Ok(name) => {
                        identity = Some(name);
                        Ok(response)
                    }
                    Err(e) => {
                        let mut rejection = ErrorResponse::new(Some(e.to_string()));
                        *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                        Err(rejection)
                    }
                }
            };

            let ws_stream = match accept_hdr_async(stream, authenticate).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let Some(display_name) = identity else {
                return;
            };

            let connection = ConnectionId::generate();
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);
            shared.hub.register(connection.clone(), display_name.clone(), msg_tx).await;
            info!(%connection, %display_name, "Client {} connected", addr);

            // Ends once the hub drops the sender
            let writer = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize {}: {}", msg.event_name(), e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            loop {
                tokio::select! {
                    frame = ws_receiver.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(command) => shared.route(&connection, command).await,
                                    Err(e) => {
                                        debug!(%connection, "Unparseable frame: {}", e);
                                        shared.notify(&connection, ServerMessage::Error(MessagePayload {
                                            message: "Некорректная команда".into(),
                                        })).await;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(%connection, "Client disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(%connection, "WebSocket error: {}", e);
                                break;
                            }
                            // Pings are answered by tungstenite
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        shared.notify(&connection, ServerMessage::Shutdown(MessagePayload {
                            message: "Сервер останавливается".into(),
                        })).await;
                        break;
                    }
                }
            }

            shared.lobbies.handle_disconnect(&connection).await;
            shared.sessions.handle_disconnect(&connection).await;
            shared.hub.unregister(&connection).await;
            if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!(%connection, "Writer did not drain in time");
            }

            info!(%connection, "Client {} cleaned up", addr);
        });
    }

    /// Stop accepting, close connections and stop the scheduler.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Live connection count.
    pub async fn connection_count(&self) -> usize {
        self.shared.hub.connection_count().await
    }

    /// Connections that can still be accepted.
    pub fn available_slots(&self) -> usize {
        self.connection_slots.available_permits()
    }

    /// Running duel count.
    pub async fn session_count(&self) -> usize {
        self.shared.sessions.session_count().await
    }
}

impl Shared {
    async fn notify(&self, connection: &ConnectionId, message: ServerMessage) {
        if let Err(e) = self.hub.send_to_connection(connection, message).await {
            warn!(%connection, "Notification not delivered: {}", e);
        }
    }

    /// Dispatch one command under the caller's display name.
    async fn route(&self, connection: &ConnectionId, command: ClientMessage) {
        let Some(name) = self.hub.display_name_of(connection).await else {
            warn!(%connection, "Command from unregistered connection");
            return;
        };

        // Outcomes are reported to clients by the managers
        match command {
            ClientMessage::StartLobby { lobby_name } => {
                let _ = self.lobbies.start_lobby(connection, &name, &lobby_name).await;
            }
            ClientMessage::JoinLobby { lobby_name } => {
                let _ = self.lobbies.join_lobby(connection, &name, &lobby_name).await;
            }
            ClientMessage::LeaveLobby { lobby_name } => {
                let _ = self.lobbies.leave_lobby(connection, &name, &lobby_name).await;
            }
            ClientMessage::StartGame { lobby_name } => {
                let _ = self.sessions.start_game(connection, &lobby_name).await;
            }
            ClientMessage::MakeMove { lobby_name, action } => {
                self.sessions.make_move(connection, &lobby_name, action).await;
            }
        }
    }
}
