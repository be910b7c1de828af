//! Game Session State
//!
//! One turn-based duel between the two participants of a full lobby.
//!
//! ```text
//! Created ──► Active ──(hp reaches 0 on a voluntary move)──► Terminated
//!               │ ▲
//!               └─┘ voluntary move / timeout handoff
//! ```
//!
//! Hp is clamped on every write. The turn holder is always the host or the
//! guest connection while the session is active.

use std::time::Duration;
use tokio::time::Instant;

use crate::game::combat::ActionEffect;
use crate::game::lobby::{ConnectionId, Lobby, Participant, Seat};

/// Maximum (and starting) hit points.
pub const MAX_HP: i32 = 30;

/// Default time a player has to move.
pub const DEFAULT_TURN_DURATION: Duration = Duration::from_secs(30);

/// Result of applying a voluntary move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveResult {
    /// Both combatants still stand; the turn passed to `next`.
    Continued {
        /// New turn holder.
        next: Participant,
    },
    /// A combatant fell; the session is terminated.
    Finished {
        /// Combatant with nonzero hp.
        winner: Participant,
        /// Combatant at zero hp.
        loser: Participant,
    },
}

/// An active duel.
#[derive(Clone, Debug)]
pub struct GameSession {
    lobby_name: String,
    host: Participant,
    guest: Participant,
    host_hp: i32,
    guest_hp: i32,
    current_turn: ConnectionId,
    turn_started_at: Instant,
    turn_duration: Duration,
    started: bool,
}

impl GameSession {
    /// Start a duel. The host moves first; both combatants start at [`MAX_HP`].
    pub fn new(
        lobby_name: impl Into<String>,
        host: Participant,
        guest: Participant,
        turn_duration: Duration,
        now: Instant,
    ) -> Self {
        Self {
            lobby_name: lobby_name.into(),
            current_turn: host.connection.clone(),
            host,
            guest,
            host_hp: MAX_HP,
            guest_hp: MAX_HP,
            turn_started_at: now,
            turn_duration,
            started: true,
        }
    }

    /// Name of the owning lobby (and broadcast group).
    pub fn lobby_name(&self) -> &str {
        &self.lobby_name
    }

    /// Host combatant.
    pub fn host(&self) -> &Participant {
        &self.host
    }

    /// Guest combatant.
    pub fn guest(&self) -> &Participant {
        &self.guest
    }

    /// Host hit points.
    pub fn host_hp(&self) -> i32 {
        self.host_hp
    }

    /// Guest hit points.
    pub fn guest_hp(&self) -> i32 {
        self.guest_hp
    }

    /// Hit points of a seat.
    pub fn hp(&self, seat: Seat) -> i32 {
        match seat {
            Seat::Host => self.host_hp,
            Seat::Guest => self.guest_hp,
        }
    }

    /// Set hit points of a seat, clamped to `[0, MAX_HP]`.
    pub fn set_hp(&mut self, seat: Seat, hp: i32) {
        let hp = hp.clamp(0, MAX_HP);
        match seat {
            Seat::Host => self.host_hp = hp,
            Seat::Guest => self.guest_hp = hp,
        }
    }

    /// Connection currently allowed to act.
    pub fn current_turn(&self) -> &ConnectionId {
        &self.current_turn
    }

    /// When the current turn began.
    pub fn turn_started_at(&self) -> Instant {
        self.turn_started_at
    }

    /// Allotted time per turn.
    pub fn turn_duration(&self) -> Duration {
        self.turn_duration
    }

    /// True from creation until termination.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Participant in a seat.
    pub fn participant(&self, seat: Seat) -> &Participant {
        match seat {
            Seat::Host => &self.host,
            Seat::Guest => &self.guest,
        }
    }

    /// Seat of a connection in this duel.
    pub fn seat_of(&self, connection: &ConnectionId) -> Option<Seat> {
        if self.host.connection == *connection {
            Some(Seat::Host)
        } else if self.guest.connection == *connection {
            Some(Seat::Guest)
        } else {
            None
        }
    }

    /// Whether the current turn has run out at `now`.
    pub fn is_turn_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.turn_started_at) >= self.turn_duration
    }

    /// Hand the turn to `connection` and restart the turn clock.
    ///
    /// Refuses (returns false) if `connection` is not one of the combatants.
    pub fn pass_turn_to(&mut self, connection: &ConnectionId, now: Instant) -> bool {
        if self.seat_of(connection).is_none() {
            return false;
        }
        self.current_turn = connection.clone();
        self.turn_started_at = now;
        true
    }

    /// Apply a resolved move made by the current turn holder.
    ///
    /// Victory is checked before the turn is handed over; a finished session
    /// is marked terminated and keeps its turn holder.
    pub fn apply_move(&mut self, effect: &ActionEffect, now: Instant) -> MoveResult {
        let actor = self.seat_of(&self.current_turn).unwrap_or(Seat::Host);
        let opponent = actor.other();

        match *effect {
            ActionEffect::Damage { amount } => {
                self.set_hp(opponent, self.hp(opponent) - amount);
            }
            ActionEffect::Heal { amount } => {
                self.set_hp(actor, self.hp(actor) + amount);
            }
        }

        if self.host_hp == 0 || self.guest_hp == 0 {
            let (winner, loser) = if self.host_hp == 0 {
                (Seat::Guest, Seat::Host)
            } else {
                (Seat::Host, Seat::Guest)
            };
            self.started = false;
            return MoveResult::Finished {
                winner: self.participant(winner).clone(),
                loser: self.participant(loser).clone(),
            };
        }

        let next = self.participant(opponent).clone();
        self.current_turn = next.connection.clone();
        self.turn_started_at = now;
        MoveResult::Continued { next }
    }

    /// Terminate without a move (store removal bookkeeping).
    pub fn terminate(&mut self) {
        self.started = false;
    }

    /// Whether `lobby` still seats exactly these two combatants.
    pub fn is_seated_in(&self, lobby: &Lobby) -> bool {
        *lobby.host() == self.host && lobby.guest() == Some(&self.guest)
    }

    /// Whether `lobby` now seats someone who is not a combatant.
    ///
    /// An empty guest seat does not count; the duel may still resume.
    pub fn is_superseded_by(&self, lobby: &Lobby) -> bool {
        *lobby.host() != self.host || lobby.guest().is_some_and(|g| *g != self.guest)
    }
}
