//! Turn Timeout Scheduler
//!
//! Background sweep that hands the turn to the opponent once the current
//! turn holder has run out of time. A timeout never changes hp and never
//! ends a duel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::core::store::{Entry, LobbyStore, SessionStore};
use crate::game::session::GameSession;
use crate::network::hub::NotificationDispatcher;
use crate::network::protocol::{GameStatePayload, ServerMessage};

/// Message broadcast when a turn is skipped.
pub const TIMEOUT_MESSAGE: &str = "Игрок пропустил ход. Ход передан другому игроку.";

/// Reasons an expired turn could not be handed over.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    /// The lobby has no guest to hand the turn to.
    #[error("no opponent seated in lobby {0}")]
    NoOpponent(String),

    /// The lobby's current guest is not a combatant of this duel.
    #[error("opponent in lobby {0} is not part of the running duel")]
    OpponentNotInDuel(String),
}

/// Periodic turn-timeout sweep.
pub struct TurnScheduler {
    lobbies: Arc<LobbyStore>,
    sessions: Arc<SessionStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    tick: Duration,
}

impl TurnScheduler {
    /// Create a scheduler sweeping every `tick`.
    pub fn new(
        lobbies: Arc<LobbyStore>,
        sessions: Arc<SessionStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        tick: Duration,
    ) -> Self {
        Self {
            lobbies,
            sessions,
            dispatcher,
            tick,
        }
    }

    /// Sweep on every tick until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_ms = self.tick.as_millis() as u64, "Turn scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Instant::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("Turn scheduler stopped");
                    break;
                }
            }
        }
    }

    /// Hand over every expired turn. Returns the number of handoffs.
    ///
    /// A failure or panic while handling one session is logged and the
    /// sweep moves on to the next.
    pub async fn sweep(&self, now: Instant) -> usize {
        let mut handed_over = 0;

        for (lobby_name, entry) in self.sessions.snapshot().await {
            let attempt = AssertUnwindSafe(self.expire_turn(&lobby_name, &entry, now))
                .catch_unwind()
                .await;

            match attempt {
                Ok(Ok(true)) => handed_over += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(lobby = %lobby_name, "Timeout handoff skipped: {}", e),
                Err(_) => error!(lobby = %lobby_name, "Timeout handoff panicked"),
            }
        }

        handed_over
    }

    /// Hand over one session's turn if it has expired.
    async fn expire_turn(
        &self,
        lobby_name: &str,
        entry: &Entry<GameSession>,
        now: Instant,
    ) -> Result<bool, HandoffError> {
        let mut session = entry.lock().await;
        if !session.is_started() {
            return Ok(false);
        }

        // Lobby may already be gone while the duel lingers
        let Some(lobby) = self.lobbies.get(lobby_name).await else {
            return Ok(false);
        };
        let lobby = lobby.lock().await;

        // A re-created lobby with other members: the old duel is over
        if session.is_superseded_by(&lobby) {
            session.terminate();
            drop(lobby);
            self.sessions.remove_entry(lobby_name, entry).await;
            info!(lobby = lobby_name, "Dropped duel superseded by a new lobby");
            return Ok(false);
        }

        if !session.is_turn_expired(now) {
            return Ok(false);
        }
        let opponent = lobby
            .opponent_of(session.current_turn())
            .cloned()
            .ok_or_else(|| HandoffError::NoOpponent(lobby_name.to_string()))?;
        drop(lobby);

        if !session.pass_turn_to(&opponent.connection, now) {
            return Err(HandoffError::OpponentNotInDuel(lobby_name.to_string()));
        }

        self.dispatcher
            .send_to_group(lobby_name, ServerMessage::GameStateUpdate(GameStatePayload {
                message: TIMEOUT_MESSAGE.into(),
                host_hp: session.host_hp(),
                guest_hp: session.guest_hp(),
                current_player_nickname: opponent.name.clone(),
            }))
            .await;

        info!(lobby = lobby_name, next = %opponent.name, "Turn skipped on timeout");
        Ok(true)
    }
}
