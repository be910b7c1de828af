//! Core primitives.
//!
//! Seeded randomness and the keyed, per-entry-locked stores that lobbies
//! and sessions live in.

pub mod rng;
pub mod store;

pub use rng::{DeterministicRng, RollSource, SharedRng};
pub use store::{Entry, LobbyStore, Registry, SessionStore};
