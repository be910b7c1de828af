//! Session Management
//!
//! Starts duels in full lobbies and applies voluntary moves. Every mutation
//! of a session, and the notifications describing it, happen under that
//! session's lock.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::rng::RollSource;
use crate::core::store::{LobbyStore, SessionStore};
use crate::game::combat::{resolve, CombatAction};
use crate::game::lobby::{ConnectionId, Participant};
use crate::game::session::{GameSession, MoveResult, DEFAULT_TURN_DURATION};
use crate::network::hub::NotificationDispatcher;
use crate::network::lobby_manager::LobbyError;
use crate::network::protocol::{
    GameStatePayload, ServerMessage, StartGamePayload, VictoryPayload,
};

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time a player has to move before the turn is skipped.
    pub turn_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            turn_duration: DEFAULT_TURN_DURATION,
        }
    }
}

/// Why a move was refused. State is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveRejection {
    /// Caller does not hold the turn.
    #[error("Сейчас не ваш ход.")]
    NotYourTurn,

    /// Action code outside 1..=3.
    #[error("Неправильное действие.")]
    InvalidAction(i32),
}

/// What a `MakeMove` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Refused; only the caller was told.
    Rejected(MoveRejection),
    /// Applied; the turn passed to `next`.
    Continued {
        /// Host hit points after the move.
        host_hp: i32,
        /// Guest hit points after the move.
        guest_hp: i32,
        /// New turn holder.
        next: Participant,
    },
    /// Applied and lethal; the session is gone.
    Finished {
        /// Surviving combatant.
        winner: Participant,
        /// Combatant at zero hp.
        loser: Participant,
    },
}

/// Coordinates duel start and moves.
pub struct SessionManager {
    lobbies: Arc<LobbyStore>,
    sessions: Arc<SessionStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    rolls: Arc<dyn RollSource>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a manager over the shared stores.
    pub fn new(
        lobbies: Arc<LobbyStore>,
        sessions: Arc<SessionStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        rolls: Arc<dyn RollSource>,
        config: SessionConfig,
    ) -> Self {
        Self {
            lobbies,
            sessions,
            dispatcher,
            rolls,
            config,
        }
    }

    /// Number of running duels.
    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    async fn reply(&self, connection: &ConnectionId, message: ServerMessage) {
        if let Err(e) = self.dispatcher.send_to_connection(connection, message).await {
            warn!(%connection, "Reply not delivered: {}", e);
        }
    }

    /// Start the duel in a full lobby. The host moves first.
    #[instrument(skip(self))]
    pub async fn start_game(
        &self,
        caller: &ConnectionId,
        lobby_name: &str,
    ) -> Result<StartGamePayload, LobbyError> {
        let (host, guest) = match self.seated_pair(caller, lobby_name).await {
            Ok(pair) => pair,
            Err(e) => return Err(self.reject_start(caller, lobby_name, e).await),
        };

        self.retire_stale(lobby_name, &host, &guest).await;

        let session = GameSession::new(
            lobby_name,
            host.clone(),
            guest,
            self.config.turn_duration,
            Instant::now(),
        );
        let Some(entry) = self.sessions.insert_if_absent(lobby_name, session).await else {
            return Err(self.reject_start(caller, lobby_name, LobbyError::GameAlreadyStarted).await);
        };

        // Hold the new session so no move is broadcast before the start
        let _session = entry.lock().await;
        let payload = StartGamePayload {
            success: true,
            message: "Игра началась!".into(),
            current_player_connection: host.connection.to_string(),
            lobby_name: lobby_name.to_string(),
        };
        self.dispatcher
            .send_to_group(lobby_name, ServerMessage::StartGameResponse(payload.clone()))
            .await;

        info!(lobby = lobby_name, first = %host.name, "Game started");
        Ok(payload)
    }

    /// Drop a leftover duel under `lobby_name` unless it is a running duel
    /// between `host` and `guest`.
    async fn retire_stale(&self, lobby_name: &str, host: &Participant, guest: &Participant) {
        let Some(entry) = self.sessions.get(lobby_name).await else {
            return;
        };
        let mut session = entry.lock().await;
        if session.is_started() && session.host() == host && session.guest() == guest {
            return;
        }

        session.terminate();
        if self.sessions.remove_entry(lobby_name, &entry).await {
            info!(lobby = lobby_name, "Replaced leftover duel");
        }
    }

    /// End every duel `connection` fought in whose lobby no longer seats
    /// both combatants.
    pub async fn handle_disconnect(&self, connection: &ConnectionId) {
        for (lobby_name, entry) in self.sessions.snapshot().await {
            let mut session = entry.lock().await;
            if session.seat_of(connection).is_none() {
                continue;
            }

            let seated = match self.lobbies.get(&lobby_name).await {
                Some(lobby) => session.is_seated_in(&*lobby.lock().await),
                None => false,
            };
            if seated {
                continue;
            }

            session.terminate();
            if self.sessions.remove_entry(&lobby_name, &entry).await {
                info!(lobby = %lobby_name, %connection, "Duel abandoned on disconnect");
            }
        }
    }

    /// Host and guest of a full lobby the caller belongs to.
    async fn seated_pair(
        &self,
        caller: &ConnectionId,
        lobby_name: &str,
    ) -> Result<(Participant, Participant), LobbyError> {
        let entry = self.lobbies.get(lobby_name).await.ok_or(LobbyError::LobbyNotFull)?;
        let lobby = entry.lock().await;

        let guest = lobby.guest().cloned().ok_or(LobbyError::LobbyNotFull)?;
        if !lobby.contains(caller) {
            return Err(LobbyError::NotAMember);
        }
        Ok((lobby.host().clone(), guest))
    }

    async fn reject_start(&self, caller: &ConnectionId, lobby_name: &str, error: LobbyError) -> LobbyError {
        debug!(lobby = lobby_name, "StartGame rejected: {}", error);
        let payload = StartGamePayload {
            success: false,
            message: error.to_string(),
            lobby_name: lobby_name.to_string(),
            ..Default::default()
        };
        self.reply(caller, ServerMessage::StartGameResponse(payload)).await;
        error
    }

    /// Apply a move by the caller.
    ///
    /// Returns `None` when no session is running for the lobby; stale
    /// commands after a duel ended land here.
    #[instrument(skip(self))]
    pub async fn make_move(
        &self,
        caller: &ConnectionId,
        lobby_name: &str,
        action: i32,
    ) -> Option<MoveOutcome> {
        let entry = self.sessions.get(lobby_name).await?;
        let mut session = entry.lock().await;
        if !session.is_started() {
            return None;
        }

        if session.current_turn() != caller {
            return Some(self.reject_move(caller, MoveRejection::NotYourTurn).await);
        }
        let action = match CombatAction::try_from(action) {
            Ok(action) => action,
            Err(code) => return Some(self.reject_move(caller, MoveRejection::InvalidAction(code)).await),
        };

        let effect = resolve(action, self.rolls.as_ref());
        let description = effect.describe(action);

        match session.apply_move(&effect, Instant::now()) {
            MoveResult::Finished { winner, loser } => {
                self.reply(&winner.connection, ServerMessage::EndVictoryResponse(VictoryPayload {
                    victory: true,
                    message: "Вы победили!".into(),
                })).await;
                self.reply(&loser.connection, ServerMessage::EndVictoryResponse(VictoryPayload {
                    victory: false,
                    message: "Вы проиграли!".into(),
                })).await;

                self.sessions.remove_entry(lobby_name, &entry).await;
                info!(lobby = lobby_name, winner = %winner.name, "Game finished");

                Some(MoveOutcome::Finished { winner, loser })
            }
            MoveResult::Continued { next } => {
                let (host_hp, guest_hp) = (session.host_hp(), session.guest_hp());
                self.dispatcher
                    .send_to_group(lobby_name, ServerMessage::GameStateUpdate(GameStatePayload {
                        message: description,
                        host_hp,
                        guest_hp,
                        current_player_nickname: next.name.clone(),
                    }))
                    .await;

                Some(MoveOutcome::Continued { host_hp, guest_hp, next })
            }
        }
    }

    async fn reject_move(&self, caller: &ConnectionId, rejection: MoveRejection) -> MoveOutcome {
        debug!(%caller, "Move rejected: {:?}", rejection);
        self.reply(caller, ServerMessage::GameStateUpdate(GameStatePayload::notice(rejection.to_string())))
            .await;
        MoveOutcome::Rejected(rejection)
    }
}
