//! Player Profiles
//!
//! Public profile (nickname and avatar) lookup used to build the lobby
//! roster. Account storage lives elsewhere; this module only reads a
//! nickname-to-avatar index and the avatar files it points at.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, warn};

/// Profile lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// Profile index could not be read.
    #[error("failed to read profile index: {0}")]
    Io(#[from] std::io::Error),

    /// Profile index is not valid JSON.
    #[error("invalid profile index: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Avatar image ready for the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Avatar {
    /// Base64-encoded image bytes.
    pub data: String,
    /// Original file name.
    pub file_name: String,
}

/// Public profile of a player.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    /// Nickname shown to the other player.
    pub nickname: String,
    /// Avatar, if one could be loaded.
    pub avatar: Option<Avatar>,
}

impl Profile {
    /// Profile with a nickname and no avatar.
    pub fn bare(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            avatar: None,
        }
    }
}

/// Looks up public profiles by display name.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Profile for `display_name`, or `None` if the user is unknown.
    async fn profile_of(&self, display_name: &str) -> Result<Option<Profile>, ProfileError>;
}

/// Profiles served from a JSON index plus an avatar directory.
///
/// The index maps nickname to avatar path relative to `avatar_root`:
///
/// ```json
/// { "alice": "avatars/alice.png", "bob": "/avatars/bob.jpg" }
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileProfileStore {
    avatars: BTreeMap<String, String>,
    avatar_root: PathBuf,
}

#[derive(Deserialize)]
#[serde(transparent)]
struct ProfileIndex(BTreeMap<String, String>);

impl FileProfileStore {
    /// Store with an in-memory index.
    pub fn new(avatars: BTreeMap<String, String>, avatar_root: impl Into<PathBuf>) -> Self {
        Self {
            avatars,
            avatar_root: avatar_root.into(),
        }
    }

    /// Load the index from a JSON file.
    pub async fn load(index_path: &Path, avatar_root: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let raw = tokio::fs::read_to_string(index_path).await?;
        let ProfileIndex(avatars) = serde_json::from_str(&raw)?;
        Ok(Self::new(avatars, avatar_root))
    }

    /// Number of known profiles.
    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    /// Read and encode an avatar; any failure yields `None`.
    async fn read_avatar(&self, avatar_url: &str) -> Option<Avatar> {
        let relative = avatar_url.trim_start_matches('/');
        if relative.trim().is_empty() {
            return None;
        }

        let path = self.avatar_root.join(relative);
        let file_name = path.file_name()?.to_string_lossy().into_owned();

        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(Avatar {
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
                file_name,
            }),
            Err(e) => {
                warn!(path = %path.display(), "Avatar unavailable: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn profile_of(&self, display_name: &str) -> Result<Option<Profile>, ProfileError> {
        let Some(avatar_url) = self.avatars.get(display_name) else {
            debug!(display_name, "No profile on record");
            return Ok(None);
        };

        Ok(Some(Profile {
            nickname: display_name.to_string(),
            avatar: self.read_avatar(avatar_url).await,
        }))
    }
}
