//! # Duel Lobby Server
//!
//! Lobby matchmaking and turn-based duels for two players over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DUEL LOBBY SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/              - Shared primitives                      │
//! │  ├── rng.rs         - Seeded Xorshift128+ roll source        │
//! │  └── store.rs       - Keyed registries, one lock per entry   │
//! │                                                              │
//! │  game/              - State types (no I/O)                   │
//! │  ├── lobby.rs       - Host and guest seats                   │
//! │  ├── combat.rs      - Strike and heal resolution             │
//! │  └── session.rs     - Hit points and turn clock              │
//! │                                                              │
//! │  network/           - Async services                         │
//! │  ├── server.rs      - WebSocket accept loop                  │
//! │  ├── auth.rs        - Handshake identity                     │
//! │  ├── hub.rs         - Connections and broadcast groups       │
//! │  ├── protocol.rs    - Commands and notifications             │
//! │  ├── profile.rs     - Nicknames and avatars                  │
//! │  ├── lobby_manager.rs   - Start, join, leave                 │
//! │  ├── session_manager.rs - Start game, make move              │
//! │  └── scheduler.rs   - Turn timeout sweep                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! Each lobby and each session sits behind its own mutex. Code that needs
//! both takes the session lock first and holds the lobby lock only briefly.
//! Notifications about a session are sent while its lock is held, so
//! clients observe moves and timeouts in the order they were applied.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

use std::time::Duration;

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::{DeterministicRng, RollSource, SharedRng};
pub use game::lobby::{ConnectionId, Lobby, Participant};
pub use game::session::{GameSession, MAX_HP};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default period of the turn-timeout sweep
pub const SCHEDULER_TICK: Duration = Duration::from_secs(1);
