use crate::registry::descriptor::StateSnapshot;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to read state at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write state at {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("state at {path} is not valid JSON: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Externally persisted registry storage.
///
/// The backing store does not support fine-grained field mutation: `load`
/// hands out a full snapshot and `replace` writes a full snapshot back.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<StateSnapshot, StateStoreError>;
    fn replace(&self, snapshot: &StateSnapshot) -> Result<(), StateStoreError>;
}

/// JSON-file-backed store. Writes go through a sibling temp file and a
/// rename so a crashed write never leaves a torn snapshot behind.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "steward.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateSnapshot, StateStoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateSnapshot::default());
            }
            Err(err) => {
                return Err(StateStoreError::Read {
                    path: self.path.display().to_string(),
                    source: err,
                });
            }
        };

        serde_json::from_str(&raw).map_err(|err| StateStoreError::Decode {
            path: self.path.display().to_string(),
            source: err,
        })
    }

    fn replace(&self, snapshot: &StateSnapshot) -> Result<(), StateStoreError> {
        let encoded =
            serde_json::to_vec_pretty(snapshot).map_err(StateStoreError::Encode)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| StateStoreError::Write {
                    path: self.path.display().to_string(),
                    source: err,
                })?;
            }
        }

        let tmp = self.tmp_path();
        std::fs::write(&tmp, &encoded).map_err(|err| StateStoreError::Write {
            path: tmp.display().to_string(),
            source: err,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|err| StateStoreError::Write {
            path: self.path.display().to_string(),
            source: err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::descriptor::{Flag, KafkaDescriptor};

    #[test]
    fn load_of_absent_file_yields_default_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("steward.json"));
        let snapshot = store.load().unwrap();
        assert_eq!(snapshot, StateSnapshot::default());
    }

    #[test]
    fn replace_then_load_round_trips_whole_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested/steward.json"));

        let mut snapshot = StateSnapshot::default();
        snapshot.kafka = Some(KafkaDescriptor {
            bootstrap_server: "broker-0:9092".to_string(),
            username: "client".to_string(),
            password: "pw".to_string(),
            initialized: Flag::Pending,
        });
        snapshot.flags.ran_upgrade = Flag::Done;

        store.replace(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), snapshot);

        // A second replace fully overwrites, never merges.
        let empty = StateSnapshot::default();
        store.replace(&empty).unwrap();
        assert_eq!(store.load().unwrap(), empty);
    }

    #[test]
    fn corrupt_state_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileStateStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(StateStoreError::Decode { .. })
        ));
    }
}
