//! Durable recovery of in-flight form state.
//!
//! One snapshot per session id, stored as a JSON envelope carrying a format
//! version and a checksum of the state. Anything that fails to parse or
//! verify is reported as "nothing to recover" and dropped from the store.

use catalog_core::Snapshot;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::traits::KeyValueStore;

pub const ENVELOPE_VERSION: u32 = 1;
pub const DEFAULT_KEY_PREFIX: &str = "form-recovery:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub key_prefix: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<S> {
    version: u32,
    checksum: String,
    snapshot: S,
}

pub struct RecoveryChannel<S> {
    store: S,
    config: RecoveryConfig,
}

impl<S: KeyValueStore> RecoveryChannel<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, RecoveryConfig::default())
    }

    pub fn with_config(store: S, config: RecoveryConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key(&self, session: &str) -> String {
        format!("{}{}", self.config.key_prefix, session)
    }

    /// Persist `snapshot` as the recoverable state of `session`, replacing
    /// whatever was stored before.
    ///
    /// State that would not read back intact, such as a non-finite float,
    /// is refused with [`StorageError::Serialization`] and nothing is written.
    pub fn save<T>(&mut self, session: &str, snapshot: &Snapshot<T>) -> Result<(), StorageError>
    where
        T: Serialize + DeserializeOwned,
    {
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            checksum: to_hex(&snapshot.checksum()?),
            snapshot,
        };
        let json = serde_json::to_string(&envelope)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if let Err(reason) = decode::<T>(&json) {
            return Err(StorageError::Serialization(format!(
                "state would not survive recovery: {reason}"
            )));
        }
        let key = self.key(session);
        self.store.set(&key, &json)?;
        tracing::debug!(session, bytes = json.len(), "persisted recovery state");
        Ok(())
    }

    /// Load the recoverable state of `session`, if any.
    ///
    /// Only store failures are errors. Corrupted entries are logged, removed
    /// and reported as `None`.
    pub fn load<T>(&mut self, session: &str) -> Result<Option<Snapshot<T>>, StorageError>
    where
        T: Serialize + DeserializeOwned,
    {
        let key = self.key(session);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };

        match decode::<T>(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(reason) => {
                tracing::warn!(session, %reason, "discarding corrupted recovery state");
                if let Err(err) = self.store.remove(&key) {
                    tracing::warn!(session, error = %err, "failed to remove corrupted recovery state");
                }
                Ok(None)
            }
        }
    }

    pub fn clear(&mut self, session: &str) -> Result<(), StorageError> {
        let key = self.key(session);
        self.store.remove(&key)
    }

    pub fn has_state(&self, session: &str) -> Result<bool, StorageError> {
        Ok(self.store.get(&self.key(session))?.is_some())
    }

    /// Session ids that currently have persisted state.
    pub fn sessions(&self) -> Result<Vec<String>, StorageError> {
        let prefix = &self.config.key_prefix;
        Ok(self
            .store
            .keys_with_prefix(prefix)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect())
    }
}

fn decode<T>(raw: &str) -> Result<Snapshot<T>, String>
where
    T: Serialize + DeserializeOwned,
{
    let envelope: Envelope<Snapshot<T>> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(format!("unsupported envelope version {}", envelope.version));
    }
    let actual = to_hex(&envelope.snapshot.checksum().map_err(|e| e.to_string())?);
    if actual != envelope.checksum {
        return Err("checksum mismatch".to_string());
    }
    Ok(envelope.snapshot)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
