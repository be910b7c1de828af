//! Network Layer
//!
//! WebSocket transport, handshake authentication, notification fan-out and
//! the managers that drive lobbies and duels.

pub mod auth;
pub mod hub;
pub mod lobby_manager;
pub mod profile;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session_manager;

pub use auth::{AuthConfig, AuthError, TokenClaims, validate_token};
pub use hub::{ConnectionHub, DispatchError, IdentityResolver, NotificationDispatcher};
pub use lobby_manager::{LeaveOutcome, LobbyError, LobbyManager};
pub use profile::{FileProfileStore, Profile, ProfileError, ProfileStore};
pub use protocol::{ClientMessage, ServerMessage};
pub use scheduler::TurnScheduler;
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session_manager::{MoveOutcome, MoveRejection, SessionConfig, SessionManager};
