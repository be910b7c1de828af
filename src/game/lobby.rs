//! Lobby Model
//!
//! A named pairing container: one host for its whole lifetime, at most one
//! guest. Pure data; the concurrency discipline lives in the stores and
//! managers.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Transport-assigned identifier of one live connection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// A connection together with the display name it authenticated as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    /// Connection identifier.
    pub connection: ConnectionId,
    /// Display name.
    pub name: String,
}

impl Participant {
    /// Create a participant.
    pub fn new(connection: impl Into<ConnectionId>, name: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            name: name.into(),
        }
    }

    /// Match by both connection and display name.
    pub fn is(&self, connection: &ConnectionId, name: &str) -> bool {
        self.connection == *connection && self.name == name
    }
}

/// Which seat of a lobby a participant occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seat {
    /// Lobby creator.
    Host,
    /// Joiner.
    Guest,
}

impl Seat {
    /// The other seat.
    pub fn other(self) -> Seat {
        match self {
            Seat::Host => Seat::Guest,
            Seat::Guest => Seat::Host,
        }
    }
}

// =============================================================================
// LOBBY
// =============================================================================

/// A lobby awaiting or holding two participants.
#[derive(Clone, Debug)]
pub struct Lobby {
    name: String,
    host: Participant,
    guest: Option<Participant>,
}

impl Lobby {
    /// Create a lobby owned by `host`.
    pub fn new(name: impl Into<String>, host: Participant) -> Self {
        Self {
            name: name.into(),
            host,
            guest: None,
        }
    }

    /// Lobby name (also the broadcast group name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host participant.
    pub fn host(&self) -> &Participant {
        &self.host
    }

    /// Guest participant, if one has joined.
    pub fn guest(&self) -> Option<&Participant> {
        self.guest.as_ref()
    }

    /// A lobby is full exactly when the guest seat is taken.
    pub fn is_full(&self) -> bool {
        self.guest.is_some()
    }

    /// Whether `connection` is host or guest.
    pub fn contains(&self, connection: &ConnectionId) -> bool {
        self.host.connection == *connection
            || self.guest.as_ref().is_some_and(|g| g.connection == *connection)
    }

    /// Seat held by a caller, matched on connection and display name.
    pub fn seat_of(&self, connection: &ConnectionId, name: &str) -> Option<Seat> {
        if self.host.is(connection, name) {
            Some(Seat::Host)
        } else if self.guest.as_ref().is_some_and(|g| g.is(connection, name)) {
            Some(Seat::Guest)
        } else {
            None
        }
    }

    /// Seat held by a connection, ignoring display name.
    pub fn seat_of_connection(&self, connection: &ConnectionId) -> Option<Seat> {
        if self.host.connection == *connection {
            Some(Seat::Host)
        } else if self.guest.as_ref().is_some_and(|g| g.connection == *connection) {
            Some(Seat::Guest)
        } else {
            None
        }
    }

    /// Take the guest seat. Returns false if it is already occupied.
    pub fn seat_guest(&mut self, guest: Participant) -> bool {
        if self.guest.is_some() {
            return false;
        }
        self.guest = Some(guest);
        true
    }

    /// Vacate the guest seat, returning the departing guest.
    pub fn clear_guest(&mut self) -> Option<Participant> {
        self.guest.take()
    }

    /// Opponent of `connection`: the guest for the host, the host otherwise.
    ///
    /// `None` when the host asks and no guest is seated.
    pub fn opponent_of(&self, connection: &ConnectionId) -> Option<&Participant> {
        if self.host.connection == *connection {
            self.guest.as_ref()
        } else {
            Some(&self.host)
        }
    }
}
