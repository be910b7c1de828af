//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Commands and notifications are closed enums serialized as JSON;
//! payload field names follow the deployed client (camelCase).

use serde::{Serialize, Deserialize};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Commands sent from a connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Create a lobby hosted by the caller.
    StartLobby {
        /// Lobby (and group) name.
        lobby_name: String,
    },

    /// Take the guest seat of a lobby.
    JoinLobby {
        /// Lobby name.
        lobby_name: String,
    },

    /// Leave a lobby (host departure closes it).
    LeaveLobby {
        /// Lobby name.
        lobby_name: String,
    },

    /// Start the duel in a full lobby.
    StartGame {
        /// Lobby name.
        lobby_name: String,
    },

    /// Perform a combat action on the caller's turn.
    MakeMove {
        /// Lobby name.
        lobby_name: String,
        /// Action code (1 fixed strike, 2 random strike, 3 heal).
        action: i32,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Notifications sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerMessage {
    /// Reply to `StartLobby`.
    StartLobbyResponse(StatusPayload),

    /// Reply to `JoinLobby`; on success broadcast with the roster.
    JoinLobbyResponse(JoinLobbyPayload),

    /// Reply to `LeaveLobby`; on guest departure broadcast to the group.
    LeaveLobbyResponse(StatusPayload),

    /// The lobby was torn down by its host.
    LobbyClosedResponse(MessagePayload),

    /// Reply to `StartGame`; on success broadcast to the group.
    StartGameResponse(StartGamePayload),

    /// Duel state after a move or a timeout, or a private rejection notice.
    GameStateUpdate(GameStatePayload),

    /// Private end-of-duel result.
    EndVictoryResponse(VictoryPayload),

    /// Malformed command frame.
    Error(MessagePayload),

    /// Server is shutting down.
    Shutdown(MessagePayload),
}

/// Success flag plus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    /// Whether the command succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// Message only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Human-readable text.
    pub message: String,
}

/// Lobby roster after a join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyPayload {
    /// Whether the join succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Host nickname.
    pub host_nickname: String,
    /// Host avatar, base64-encoded (empty if unavailable).
    pub host_avatar: String,
    /// Host avatar file name (empty if unavailable).
    pub host_avatar_file: String,
    /// Guest nickname.
    pub guest_nickname: String,
    /// Guest avatar, base64-encoded (empty if unavailable).
    pub guest_avatar: String,
    /// Guest avatar file name (empty if unavailable).
    pub guest_avatar_file: String,
}

/// Game start announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGamePayload {
    /// Whether the game started.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Connection that moves first.
    pub current_player_connection: String,
    /// Lobby name.
    pub lobby_name: String,
}

/// Duel state broadcast.
///
/// Rejection notices carry only `message`; hp fields are zero and the
/// nickname empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatePayload {
    /// What happened.
    pub message: String,
    /// Host hit points.
    pub host_hp: i32,
    /// Guest hit points.
    pub guest_hp: i32,
    /// Display name of the new turn holder.
    pub current_player_nickname: String,
}

impl GameStatePayload {
    /// A private notice with no state attached.
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// End-of-duel result for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VictoryPayload {
    /// True for the winner.
    pub victory: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl ServerMessage {
    /// Event name as seen by clients.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::StartLobbyResponse(_) => "StartLobbyResponse",
            ServerMessage::JoinLobbyResponse(_) => "JoinLobbyResponse",
            ServerMessage::LeaveLobbyResponse(_) => "LeaveLobbyResponse",
            ServerMessage::LobbyClosedResponse(_) => "LobbyClosedResponse",
            ServerMessage::StartGameResponse(_) => "StartGameResponse",
            ServerMessage::GameStateUpdate(_) => "GameStateUpdate",
            ServerMessage::EndVictoryResponse(_) => "EndVictoryResponse",
            ServerMessage::Error(_) => "Error",
            ServerMessage::Shutdown(_) => "Shutdown",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
