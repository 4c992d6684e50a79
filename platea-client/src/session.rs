use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use platea_domain::SessionToken;

/// Durable anonymous identity for one shopper. The token is minted on
/// first use and persisted to a small file, so it survives restarts
/// the way a browser profile would. Deleting the file mints a fresh
/// identity; the server never stores anything about it.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("session_token"),
        }
    }

    pub fn load_or_create(&self) -> io::Result<SessionToken> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let raw = raw.trim();
                if raw.is_empty() {
                    self.mint()
                } else {
                    Ok(SessionToken::new(raw))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.mint(),
            Err(e) => Err(e),
        }
    }

    fn mint(&self) -> io::Result<SessionToken> {
        let token = SessionToken::generate();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token.as_str())?;
        debug!(path = %self.path.display(), "minted new session token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("platea-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn token_survives_reload() {
        let dir = temp_dir();
        let store = SessionStore::new(&dir);

        let first = store.load_or_create().unwrap();
        let second = SessionStore::new(&dir).load_or_create().unwrap();
        assert_eq!(first, second);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn deleting_the_file_mints_a_new_identity() {
        let dir = temp_dir();
        let store = SessionStore::new(&dir);

        let first = store.load_or_create().unwrap();
        std::fs::remove_file(dir.join("session_token")).unwrap();
        let second = store.load_or_create().unwrap();
        assert_ne!(first, second);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
