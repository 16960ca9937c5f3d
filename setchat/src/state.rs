//! Local persisted state: identity, conversations and contacts.
//!
//! Stored as one JSON document:
//!
//! ```json
//! { "id": "alice", "conversations": [...], "contacts": [...] }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use setchat_proto::identity::Identity;

use crate::contacts::ContactList;
use crate::conversation::Conversation;

/// Errors from reading or writing the state file.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Reading, writing or renaming the file failed.
    #[error("state file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid state JSON.
    #[error("state file {path} is malformed: {source}")]
    Malformed {
        /// File involved.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Serializing the state failed.
    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Everything the client keeps between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalState {
    /// Last identity used.
    pub id: Option<Identity>,
    /// Conversations in display order.
    pub conversations: Vec<Conversation>,
    /// Contact directory.
    pub contacts: ContactList,
}

impl LocalState {
    /// Reads state from `path`. A missing file yields the empty state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the file exists but cannot be read or
    /// parsed.
    pub async fn load(path: &Path) -> Result<Self, StateError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no state file, starting empty");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| StateError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes state to `path`, replacing it atomically.
    ///
    /// The JSON is written to a sibling temp file which is then renamed
    /// over `path`. Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if serialization or any file operation fails.
    pub async fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(self).map_err(StateError::Serialize)?;
        let io_err = |source| StateError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, &json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        tracing::trace!(path = %path.display(), bytes = json.len(), "state saved");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
