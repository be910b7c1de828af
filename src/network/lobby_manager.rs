//! Lobby Management
//!
//! Creates, joins and tears down lobbies. Each command produces exactly one
//! reply to the caller; roster changes are also broadcast to the lobby group.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::core::store::{Entry, LobbyStore};
use crate::game::lobby::{ConnectionId, Lobby, Participant, Seat};
use crate::network::hub::NotificationDispatcher;
use crate::network::profile::{Profile, ProfileStore};
use crate::network::protocol::{
    JoinLobbyPayload, MessagePayload, ServerMessage, StatusPayload,
};

/// Lobby and game-start validation failures.
///
/// The display text is the message delivered to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    /// Caller already hosts or has joined a lobby.
    #[error("Вы уже находитесь в лобби")]
    AlreadyInLobby,

    /// A lobby with this name exists.
    #[error("Лобби с таким именем уже существует")]
    LobbyNameTaken,

    /// Lobby name is empty.
    #[error("Некорректное имя лобби")]
    InvalidLobbyName,

    /// No lobby with this name.
    #[error("Лобби не найдено")]
    LobbyNotFound,

    /// Guest seat is taken.
    #[error("Лобби заполнено")]
    LobbyFull,

    /// Caller is neither host nor guest.
    #[error("Вы не состоите в этом лобби")]
    NotAMember,

    /// Lobby is missing or has no guest.
    #[error("Невозможно начать игру. Лобби не заполнено.")]
    LobbyNotFull,

    /// A duel is already running in this lobby.
    #[error("Игра в этом лобби уже идёт")]
    GameAlreadyStarted,
}

/// How a successful leave played out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Host left; the lobby is gone.
    Closed,
    /// Guest left; the lobby waits for a new guest.
    GuestLeft,
}

/// Coordinates lobby lifecycle.
pub struct LobbyManager {
    lobbies: Arc<LobbyStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    profiles: Arc<dyn ProfileStore>,
}

impl LobbyManager {
    /// Create a manager over a shared lobby store.
    pub fn new(
        lobbies: Arc<LobbyStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            lobbies,
            dispatcher,
            profiles,
        }
    }

    /// Name of the lobby a connection hosts or has joined.
    pub async fn lobby_of(&self, connection: &ConnectionId) -> Option<String> {
        for (name, entry) in self.lobbies.snapshot().await {
            if entry.lock().await.contains(connection) {
                return Some(name);
            }
        }
        None
    }

    /// Whether `entry` is still the live record for `name`.
    async fn is_live(&self, name: &str, entry: &Entry<Lobby>) -> bool {
        matches!(self.lobbies.get(name).await, Some(current) if Arc::ptr_eq(&current, entry))
    }

    async fn reply(&self, connection: &ConnectionId, message: ServerMessage) {
        if let Err(e) = self.dispatcher.send_to_connection(connection, message).await {
            warn!(%connection, "Reply not delivered: {}", e);
        }
    }

    // =========================================================================
    // START
    // =========================================================================

    /// Create a lobby hosted by the caller.
    #[instrument(skip(self))]
    pub async fn start_lobby(
        &self,
        connection: &ConnectionId,
        display_name: &str,
        lobby_name: &str,
    ) -> Result<String, LobbyError> {
        let result = self.try_start_lobby(connection, display_name, lobby_name).await;

        let payload = match &result {
            Ok(message) => StatusPayload { success: true, message: message.clone() },
            Err(e) => {
                debug!("StartLobby rejected: {}", e);
                StatusPayload { success: false, message: e.to_string() }
            }
        };
        self.reply(connection, ServerMessage::StartLobbyResponse(payload)).await;

        result
    }

    async fn try_start_lobby(
        &self,
        connection: &ConnectionId,
        display_name: &str,
        lobby_name: &str,
    ) -> Result<String, LobbyError> {
        if lobby_name.trim().is_empty() {
            return Err(LobbyError::InvalidLobbyName);
        }
        if self.lobby_of(connection).await.is_some() {
            return Err(LobbyError::AlreadyInLobby);
        }

        let lobby = Lobby::new(lobby_name, Participant::new(connection.clone(), display_name));
        if self.lobbies.insert_if_absent(lobby_name, lobby).await.is_none() {
            return Err(LobbyError::LobbyNameTaken);
        }

        self.dispatcher.add_to_group(connection, lobby_name).await;
        info!(lobby = lobby_name, host = display_name, "Lobby created");

        Ok(format!("Вы успешно создали лобби '{}'", lobby_name))
    }

    // =========================================================================
    // JOIN
    // =========================================================================

    /// Take the guest seat and broadcast the roster to the whole group.
    #[instrument(skip(self))]
    pub async fn join_lobby(
        &self,
        connection: &ConnectionId,
        display_name: &str,
        lobby_name: &str,
    ) -> Result<JoinLobbyPayload, LobbyError> {
        match self.try_join_lobby(connection, display_name, lobby_name).await {
            Ok(host) => {
                self.dispatcher.add_to_group(connection, lobby_name).await;

                let payload = self.roster(&host, display_name).await;
                self.dispatcher
                    .send_to_group(lobby_name, ServerMessage::JoinLobbyResponse(payload.clone()))
                    .await;

                info!(lobby = lobby_name, guest = display_name, "Guest joined");
                Ok(payload)
            }
            Err(e) => {
                debug!("JoinLobby rejected: {}", e);
                let payload = JoinLobbyPayload {
                    success: false,
                    message: e.to_string(),
                    ..Default::default()
                };
                self.reply(connection, ServerMessage::JoinLobbyResponse(payload)).await;
                Err(e)
            }
        }
    }

    /// Seat the guest; returns the host's display name.
    async fn try_join_lobby(
        &self,
        connection: &ConnectionId,
        display_name: &str,
        lobby_name: &str,
    ) -> Result<String, LobbyError> {
        let entry = self.lobbies.get(lobby_name).await.ok_or(LobbyError::LobbyNotFound)?;

        if self.lobby_of(connection).await.is_some() {
            return Err(LobbyError::AlreadyInLobby);
        }

        let mut lobby = entry.lock().await;
        // The host may have closed the lobby while we waited for the lock
        if !self.is_live(lobby_name, &entry).await {
            return Err(LobbyError::LobbyNotFound);
        }
        if !lobby.seat_guest(Participant::new(connection.clone(), display_name)) {
            return Err(LobbyError::LobbyFull);
        }

        Ok(lobby.host().name.clone())
    }

    /// Both participants' public profiles. Lookup failures degrade to an
    /// empty avatar.
    async fn roster(&self, host_name: &str, guest_name: &str) -> JoinLobbyPayload {
        let host = self.profile_or_bare(host_name).await;
        let guest = self.profile_or_bare(guest_name).await;
        let host_avatar = host.avatar.unwrap_or_default();
        let guest_avatar = guest.avatar.unwrap_or_default();

        JoinLobbyPayload {
            success: true,
            message: format!("{} присоединился к лобби", guest_name),
            host_nickname: host.nickname,
            host_avatar: host_avatar.data,
            host_avatar_file: host_avatar.file_name,
            guest_nickname: guest.nickname,
            guest_avatar: guest_avatar.data,
            guest_avatar_file: guest_avatar.file_name,
        }
    }

    async fn profile_or_bare(&self, display_name: &str) -> Profile {
        match self.profiles.profile_of(display_name).await {
            Ok(Some(profile)) => profile,
            Ok(None) => Profile::bare(display_name),
            Err(e) => {
                warn!(display_name, "Profile lookup failed: {}", e);
                Profile::bare(display_name)
            }
        }
    }

    // =========================================================================
    // LEAVE
    // =========================================================================

    /// Leave a lobby. Host departure tears the lobby down; guest departure
    /// frees the guest seat.
    #[instrument(skip(self))]
    pub async fn leave_lobby(
        &self,
        connection: &ConnectionId,
        display_name: &str,
        lobby_name: &str,
    ) -> Result<LeaveOutcome, LobbyError> {
        let result = self.try_leave_lobby(connection, display_name, lobby_name).await;

        match &result {
            Ok((LeaveOutcome::Closed, guest)) => {
                if let Some(guest) = guest {
                    self.reply(&guest.connection, ServerMessage::LobbyClosedResponse(MessagePayload {
                        message: "Хост покинул лобби. Лобби закрыто.".into(),
                    })).await;
                    self.dispatcher.remove_from_group(&guest.connection, lobby_name).await;
                }
                self.dispatcher.remove_from_group(connection, lobby_name).await;
                self.reply(connection, ServerMessage::LobbyClosedResponse(MessagePayload {
                    message: "Вы покинули лобби. Лобби закрыто.".into(),
                })).await;
                info!(lobby = lobby_name, "Lobby closed by host");
            }
            Ok((LeaveOutcome::GuestLeft, _)) => {
                self.dispatcher
                    .send_to_group(lobby_name, ServerMessage::LeaveLobbyResponse(StatusPayload {
                        success: true,
                        message: "Гость покинул лобби.".into(),
                    }))
                    .await;
                self.dispatcher.remove_from_group(connection, lobby_name).await;
                info!(lobby = lobby_name, guest = display_name, "Guest left");
            }
            Err(e) => {
                debug!("LeaveLobby rejected: {}", e);
                self.reply(connection, ServerMessage::LeaveLobbyResponse(StatusPayload {
                    success: false,
                    message: e.to_string(),
                })).await;
            }
        }

        result.map(|(outcome, _)| outcome)
    }

    /// Apply the leave to the store; on host departure returns the evicted
    /// guest.
    async fn try_leave_lobby(
        &self,
        connection: &ConnectionId,
        display_name: &str,
        lobby_name: &str,
    ) -> Result<(LeaveOutcome, Option<Participant>), LobbyError> {
        let entry = self.lobbies.get(lobby_name).await.ok_or(LobbyError::LobbyNotFound)?;
        let mut lobby = entry.lock().await;
        if !self.is_live(lobby_name, &entry).await {
            return Err(LobbyError::LobbyNotFound);
        }

        match lobby.seat_of(connection, display_name) {
            None => Err(LobbyError::NotAMember),
            Some(Seat::Host) => {
                let guest = lobby.clear_guest();
                // Removed while the entry is locked so no join can slip in
                self.lobbies.remove_entry(lobby_name, &entry).await;
                Ok((LeaveOutcome::Closed, guest))
            }
            Some(Seat::Guest) => {
                lobby.clear_guest();
                Ok((LeaveOutcome::GuestLeft, None))
            }
        }
    }

    /// Release whatever lobby seat a closed connection held.
    pub async fn handle_disconnect(&self, connection: &ConnectionId) {
        let Some(lobby_name) = self.lobby_of(connection).await else {
            return;
        };

        let display_name = match self.lobbies.get(&lobby_name).await {
            Some(entry) => {
                let lobby = entry.lock().await;
                match lobby.seat_of_connection(connection) {
                    Some(Seat::Host) => lobby.host().name.clone(),
                    Some(Seat::Guest) => match lobby.guest() {
                        Some(guest) => guest.name.clone(),
                        None => return,
                    },
                    None => return,
                }
            }
            None => return,
        };

        if let Err(e) = self.leave_lobby(connection, &display_name, &lobby_name).await {
            debug!(%connection, lobby = %lobby_name, "Disconnect cleanup skipped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::network::hub::ConnectionHub;
    use crate::network::profile::{Avatar, ProfileError};

    struct StaticProfiles;

    #[async_trait]
    impl ProfileStore for StaticProfiles {
        async fn profile_of(&self, display_name: &str) -> Result<Option<Profile>, ProfileError> {
            match display_name {
                "H" => Ok(Some(Profile {
                    nickname: "H".into(),
                    avatar: Some(Avatar { data: "aGk=".into(), file_name: "h.png".into() }),
                })),
                "broken" => Err(ProfileError::Io(std::io::Error::other("disk gone"))),
                _ => Ok(None),
            }
        }
    }

    struct Harness {
        hub: Arc<ConnectionHub>,
        lobbies: Arc<LobbyStore>,
        manager: LobbyManager,
        inboxes: BTreeMap<String, mpsc::Receiver<ServerMessage>>,
    }

    impl Harness {
        async fn new(connections: &[&str]) -> Self {
            let hub = Arc::new(ConnectionHub::new());
            let lobbies = Arc::new(LobbyStore::new());
            let mut inboxes = BTreeMap::new();
            for id in connections {
                let (tx, rx) = mpsc::channel(32);
                hub.register(ConnectionId::from(*id), *id, tx).await;
                inboxes.insert(id.to_string(), rx);
            }
            let manager = LobbyManager::new(lobbies.clone(), hub.clone(), Arc::new(StaticProfiles));
            Self { hub, lobbies, manager, inboxes }
        }

        fn drain(&mut self, id: &str) -> Vec<ServerMessage> {
            let rx = self.inboxes.get_mut(id).unwrap();
            let mut out = Vec::new();
            while let Ok(msg) = rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn c(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    #[tokio::test]
    async fn test_start_lobby() {
        let mut h = Harness::new(&["H"]).await;

        let message = h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();
        assert!(message.contains("успешно"));

        let entry = h.lobbies.get("Arena").await.unwrap();
        let lobby = entry.lock().await;
        assert_eq!(lobby.host().name, "H");
        assert!(lobby.guest().is_none());
        drop(lobby);

        assert_eq!(h.hub.members_of("Arena").await, vec![c("H")]);
        let replies = h.drain("H");
        assert!(matches!(&replies[..], [ServerMessage::StartLobbyResponse(p)] if p.success));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let mut h = Harness::new(&["H", "X"]).await;
        h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();

        let result = h.manager.start_lobby(&c("X"), "X", "Arena").await;
        assert_eq!(result, Err(LobbyError::LobbyNameTaken));

        let replies = h.drain("X");
        assert!(matches!(&replies[..], [ServerMessage::StartLobbyResponse(p)]
            if !p.success && p.message == LobbyError::LobbyNameTaken.to_string()));
        // Original host untouched
        assert_eq!(h.lobbies.get("Arena").await.unwrap().lock().await.host().name, "H");
    }

    #[tokio::test]
    async fn test_host_cannot_start_second_lobby() {
        let h = Harness::new(&["H", "G"]).await;
        h.manager.start_lobby(&c("H"), "H", "A").await.unwrap();
        assert_eq!(
            h.manager.start_lobby(&c("H"), "H", "B").await,
            Err(LobbyError::AlreadyInLobby)
        );

        h.manager.join_lobby(&c("G"), "G", "A").await.unwrap();
        assert_eq!(
            h.manager.start_lobby(&c("G"), "G", "B").await,
            Err(LobbyError::AlreadyInLobby)
        );
        assert!(!h.lobbies.contains("B").await);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let h = Harness::new(&["H"]).await;
        assert_eq!(
            h.manager.start_lobby(&c("H"), "H", "  ").await,
            Err(LobbyError::InvalidLobbyName)
        );
    }

    #[tokio::test]
    async fn test_join_broadcasts_roster_to_group() {
        let mut h = Harness::new(&["H", "G"]).await;
        h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();
        h.drain("H");

        let payload = h.manager.join_lobby(&c("G"), "G", "Arena").await.unwrap();
        assert_eq!(payload.host_nickname, "H");
        assert_eq!(payload.guest_nickname, "G");
        assert_eq!(payload.host_avatar, "aGk=");
        assert_eq!(payload.host_avatar_file, "h.png");
        assert_eq!(payload.guest_avatar, "");

        for id in ["H", "G"] {
            let msgs = h.drain(id);
            assert_eq!(msgs, vec![ServerMessage::JoinLobbyResponse(payload.clone())]);
        }
        assert!(h.lobbies.get("Arena").await.unwrap().lock().await.is_full());
    }

    #[tokio::test]
    async fn test_profile_failure_degrades() {
        let h = Harness::new(&["broken", "G"]).await;
        h.manager.start_lobby(&c("broken"), "broken", "Arena").await.unwrap();

        let payload = h.manager.join_lobby(&c("G"), "G", "Arena").await.unwrap();
        assert!(payload.success);
        assert_eq!(payload.host_nickname, "broken");
        assert_eq!(payload.host_avatar, "");
    }

    #[tokio::test]
    async fn test_third_join_rejected() {
        let mut h = Harness::new(&["H", "G", "X"]).await;
        h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();
        h.manager.join_lobby(&c("G"), "G", "Arena").await.unwrap();

        assert_eq!(h.manager.join_lobby(&c("X"), "X", "Arena").await, Err(LobbyError::LobbyFull));
        assert_eq!(h.manager.join_lobby(&c("X"), "X", "Nope").await, Err(LobbyError::LobbyNotFound));

        let replies = h.drain("X");
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|m| matches!(m, ServerMessage::JoinLobbyResponse(p) if !p.success)));
        assert!(!h.hub.members_of("Arena").await.contains(&c("X")));
    }

    #[tokio::test]
    async fn test_guest_leave_keeps_lobby() {
        let mut h = Harness::new(&["H", "G", "X"]).await;
        h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();
        h.manager.join_lobby(&c("G"), "G", "Arena").await.unwrap();
        h.drain("H");
        h.drain("G");

        let outcome = h.manager.leave_lobby(&c("G"), "G", "Arena").await.unwrap();
        assert_eq!(outcome, LeaveOutcome::GuestLeft);

        assert!(matches!(&h.drain("H")[..], [ServerMessage::LeaveLobbyResponse(p)] if p.success));
        assert_eq!(h.hub.members_of("Arena").await, vec![c("H")]);

        // Seat is free again
        h.manager.join_lobby(&c("X"), "X", "Arena").await.unwrap();
    }

    #[tokio::test]
    async fn test_host_leave_closes_lobby() {
        let mut h = Harness::new(&["H", "G"]).await;
        h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();
        h.manager.join_lobby(&c("G"), "G", "Arena").await.unwrap();
        h.drain("H");
        h.drain("G");

        let outcome = h.manager.leave_lobby(&c("H"), "H", "Arena").await.unwrap();
        assert_eq!(outcome, LeaveOutcome::Closed);

        assert!(!h.lobbies.contains("Arena").await);
        assert!(h.hub.members_of("Arena").await.is_empty());
        assert!(matches!(&h.drain("G")[..], [ServerMessage::LobbyClosedResponse(_)]));
        assert!(matches!(&h.drain("H")[..], [ServerMessage::LobbyClosedResponse(_)]));
    }

    #[tokio::test]
    async fn test_leave_requires_membership() {
        let mut h = Harness::new(&["H", "X"]).await;
        h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();

        assert_eq!(h.manager.leave_lobby(&c("X"), "X", "Arena").await, Err(LobbyError::NotAMember));
        // Right connection, wrong name
        assert_eq!(h.manager.leave_lobby(&c("H"), "X", "Arena").await, Err(LobbyError::NotAMember));
        assert_eq!(h.manager.leave_lobby(&c("X"), "X", "Nope").await, Err(LobbyError::LobbyNotFound));

        assert_eq!(h.drain("X").len(), 2);
        assert!(h.lobbies.contains("Arena").await);
    }

    #[tokio::test]
    async fn test_disconnect_releases_seat() {
        let h = Harness::new(&["H", "G"]).await;
        h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();
        h.manager.join_lobby(&c("G"), "G", "Arena").await.unwrap();

        h.manager.handle_disconnect(&c("G")).await;
        assert!(!h.lobbies.get("Arena").await.unwrap().lock().await.is_full());

        h.manager.handle_disconnect(&c("H")).await;
        assert!(!h.lobbies.contains("Arena").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_single_guest() {
        let names: Vec<String> = (0..16).map(|i| format!("g{}", i)).collect();
        let mut ids: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        ids.push("H");
        let h = Harness::new(&ids).await;
        h.manager.start_lobby(&c("H"), "H", "Arena").await.unwrap();

        let manager = Arc::new(h.manager);
        let handles: Vec<_> = names
            .iter()
            .map(|name| {
                let manager = manager.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    manager.join_lobby(&ConnectionId::from(name.as_str()), &name, "Arena").await.is_ok()
                })
            })
            .collect();

        let mut joined = 0;
        for handle in handles {
            if handle.await.unwrap() {
                joined += 1;
            }
        }
        assert_eq!(joined, 1);
    }
}
