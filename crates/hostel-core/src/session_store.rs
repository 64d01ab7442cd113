//! On-disk persistence of the current session so that a restarted client can
//! resume without asking for credentials again.

use std::path::{Path, PathBuf};

use crate::error::{HostelError, Result};
use crate::models::Session;

/// Directory under the home directory holding client state.
pub const STATE_DIR_NAME: &str = ".hostel-monitor";

/// Return the state directory rooted at `base_dir`.
pub fn state_dir_in(base_dir: &Path) -> PathBuf {
    base_dir.join(STATE_DIR_NAME)
}

/// Return `~/.hostel-monitor`, or `./.hostel-monitor` without a home directory.
pub fn default_state_dir() -> PathBuf {
    state_dir_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
}

/// Reads and writes `session.json` inside a state directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store at `~/.hostel-monitor/session.json`.
    pub fn default_location() -> Self {
        Self::in_dir(&default_state_dir())
    }

    /// Store at `<dir>/session.json` (used for testing).
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join("session.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted session.
    ///
    /// A missing file is `Ok(None)`; an unreadable or corrupt file is also
    /// treated as absent (and logged) since the only remedy is a new login.
    pub fn load(&self) -> Option<Session> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "could not read stored session");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring corrupt stored session");
                None
            }
        }
    }

    /// Atomically write `session`, creating parent directories if needed.
    pub fn save(&self, session: &Session) -> Result<()> {
        let file_err = |source| HostelError::FileAccess {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(file_err)?;
        }

        let json = serde_json::to_string_pretty(session)?;

        // Write to a temp file then rename for atomicity.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(file_err)?;
        restrict_permissions(&tmp);
        std::fs::rename(&tmp, &self.path).map_err(file_err)?;
        Ok(())
    }

    /// Delete the stored session if it exists.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HostelError::FileAccess {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::debug!(error = %e, "could not restrict session file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
