//! Game Logic Module
//!
//! Plain state types with no I/O. The network layer owns locking and
//! notification.
//!
//! ## Module Structure
//!
//! - `lobby`: Connection ids, participants and the two-seat lobby
//! - `combat`: Action codes and their resolved effects
//! - `session`: Duel state, move application and turn clock

pub mod lobby;
pub mod combat;
pub mod session;

pub use lobby::{ConnectionId, Lobby, Participant, Seat};
pub use combat::{ActionEffect, CombatAction};
pub use session::{GameSession, MoveResult, MAX_HP};
