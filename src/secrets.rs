use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretContentError {
    #[error("secret `{id}` could not be read: {source}")]
    Unreadable {
        id: String,
        source: std::io::Error,
    },
    #[error("secret `{id}` is missing required key `{key}`")]
    MissingKey { id: String, key: String },
    #[error("secret `{id}` has an empty value for key `{key}`")]
    EmptyValue { id: String, key: String },
}

/// A resolved key/value secret, fetched fresh on every read.
#[derive(Clone, Debug)]
pub struct SecretBundle {
    id: String,
    entries: BTreeMap<String, String>,
}

impl SecretBundle {
    pub fn new(id: impl Into<String>, entries: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            entries,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Fails closed: a missing key and an empty value are both malformed
    /// content, never a default.
    pub fn require(&self, key: &str) -> Result<&str, SecretContentError> {
        match self.entries.get(key) {
            None => Err(SecretContentError::MissingKey {
                id: self.id.clone(),
                key: key.to_string(),
            }),
            Some(value) if value.is_empty() => Err(SecretContentError::EmptyValue {
                id: self.id.clone(),
                key: key.to_string(),
            }),
            Some(value) => Ok(value),
        }
    }
}

pub trait SecretStore: Send + Sync {
    fn get_secret(&self, id: &str) -> Result<SecretBundle, SecretContentError>;
}

/// Reads mounted secrets laid out as `<root>/<id>/<key>` files, the way
/// orchestrators project secret volumes. Every call re-reads the directory
/// so rotated content is picked up without a restart.
pub struct DirSecretStore {
    root: PathBuf,
}

impl DirSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SecretStore for DirSecretStore {
    fn get_secret(&self, id: &str) -> Result<SecretBundle, SecretContentError> {
        let dir = self.root.join(id);
        let entries = std::fs::read_dir(&dir).map_err(|err| SecretContentError::Unreadable {
            id: id.to_string(),
            source: err,
        })?;

        let mut bundle = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|err| SecretContentError::Unreadable {
                id: id.to_string(),
                source: err,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(key) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if key.starts_with('.') {
                continue;
            }
            let value =
                std::fs::read_to_string(&path).map_err(|err| SecretContentError::Unreadable {
                    id: id.to_string(),
                    source: err,
                })?;
            bundle.insert(key.to_string(), value.trim_end_matches('\n').to_string());
        }

        Ok(SecretBundle::new(id, bundle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(entries: &[(&str, &str)]) -> SecretBundle {
        SecretBundle::new(
            "encryption-keys",
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn require_rejects_missing_and_empty_keys() {
        let secret = bundle(&[("gms-key", "abc"), ("frontend-key", "")]);
        assert_eq!(secret.require("gms-key").unwrap(), "abc");
        assert!(matches!(
            secret.require("frontend-key"),
            Err(SecretContentError::EmptyValue { .. })
        ));
        assert!(matches!(
            secret.require("signing-key"),
            Err(SecretContentError::MissingKey { .. })
        ));
    }

    #[test]
    fn dir_store_reads_key_files_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let secret_dir = dir.path().join("oidc-main");
        std::fs::create_dir_all(&secret_dir).unwrap();
        std::fs::write(secret_dir.join("client-id"), "web-client\n").unwrap();
        std::fs::write(secret_dir.join("client-secret"), "s3cr3t").unwrap();

        let store = DirSecretStore::new(dir.path());
        let secret = store.get_secret("oidc-main").unwrap();
        assert_eq!(secret.require("client-id").unwrap(), "web-client");
        assert_eq!(secret.require("client-secret").unwrap(), "s3cr3t");

        // Rotation is visible on the next read.
        std::fs::write(secret_dir.join("client-secret"), "rotated").unwrap();
        let secret = store.get_secret("oidc-main").unwrap();
        assert_eq!(secret.require("client-secret").unwrap(), "rotated");
    }

    #[test]
    fn unknown_secret_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirSecretStore::new(dir.path());
        assert!(matches!(
            store.get_secret("absent"),
            Err(SecretContentError::Unreadable { .. })
        ));
    }
}
