//! Durable local persistence of the upload session.
//!
//! The substrate is a plain key-value store; [`SessionStore`] keeps one
//! serialized [`UploadSession`] under [`SESSION_KEY`] and a cheap boolean
//! under [`IN_FLIGHT_KEY`] that can be read without parsing the session.

use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::Mutex,
};

use common::data::UploadSession;
use log::{debug, warn};

pub const SESSION_KEY: &str = "docchat_upload_session";
pub const IN_FLIGHT_KEY: &str = "docchat_uploads_in_progress";
pub const DEFAULT_SESSION_MAX_AGE_MS: u64 = 30 * 60 * 1000;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One file per key inside a state directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid key {key:?}"),
            ));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a reader never sees half a session.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| io::Error::other("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

/// Best-effort persistence of a single [`UploadSession`].
///
/// Nothing here returns an error: a store that is full or unavailable only
/// costs the ability to recover, never the upload itself.
pub struct SessionStore<S> {
    kv: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn inner(&self) -> &S {
        &self.kv
    }

    pub fn save(&self, session: &UploadSession) {
        let serialized = match serde_json::to_string(session) {
            Ok(s) => s,
            Err(e) => {
                warn!("could not serialize upload session: {e}");
                return;
            }
        };
        if let Err(e) = self.kv.set(SESSION_KEY, &serialized) {
            warn!("could not persist upload session: {e}");
        }
        self.set_in_flight(session.has_in_flight());
    }

    pub fn load(&self) -> Option<UploadSession> {
        let raw = match self.kv.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("could not read upload session: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                debug!("ignoring malformed upload session: {e}");
                None
            }
        }
    }

    pub fn clear(&self) {
        for key in [SESSION_KEY, IN_FLIGHT_KEY] {
            if let Err(e) = self.kv.remove(key) {
                warn!("could not remove {key}: {e}");
            }
        }
    }

    /// Reads only the in-flight flag.
    pub fn in_flight(&self) -> bool {
        matches!(self.kv.get(IN_FLIGHT_KEY), Ok(Some(v)) if v.trim() == "true")
    }

    pub fn set_in_flight(&self, in_flight: bool) {
        let result = if in_flight {
            self.kv.set(IN_FLIGHT_KEY, "true")
        } else {
            self.kv.remove(IN_FLIGHT_KEY)
        };
        if let Err(e) = result {
            warn!("could not update in-flight flag: {e}");
        }
    }
}

pub fn is_expired(session: &UploadSession, now: u64, max_age_ms: u64) -> bool {
    session.is_expired(now, max_age_ms)
}
