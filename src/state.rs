//! Resumable run state for the exact-match pipeline.
//!
//! Every key's status and resolved vector live in a sled database so an
//! interrupted run picks up where it stopped. sled holds a lock on the
//! directory, so a second run against the same state fails to open it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const FINGERPRINT_KEY: &[u8] = b"input_fingerprint";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    Pending,
    Resolved,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub status: KeyStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub resolved: usize,
    pub failed: usize,
}

pub struct RunState {
    db: sled::Db,
    keys: sled::Tree,
}

impl RunState {
    pub fn open(dir: &Path) -> Result<Self> {
        let db = sled::open(dir)
            .with_context(|| format!("Failed to open run state at {}", dir.display()))?;
        let keys = db.open_tree("keys")?;
        info!("Opened run state at {} ({} keys)", dir.display(), keys.len());
        Ok(Self { db, keys })
    }

    /// Record the input's fingerprint, or compare it with the recorded one.
    ///
    /// Returns false (and warns) when the input changed since the state was
    /// created. The recorded fingerprint is left as is.
    pub fn check_input(&self, name: &str, current: u64) -> Result<bool> {
        match self.db.get(FINGERPRINT_KEY)? {
            Some(stored) if stored.as_ref() == &current.to_be_bytes()[..] => Ok(true),
            Some(_) => {
                warn!(
                    "{} changed since this run state was created; resolved keys are reused as is",
                    name
                );
                Ok(false)
            }
            None => {
                self.db.insert(FINGERPRINT_KEY, &current.to_be_bytes()[..])?;
                Ok(true)
            }
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<KeyRecord>> {
        match self.keys.get(key.as_bytes())? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt run state entry for '{}'", key))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn status(&self, key: &str) -> Result<KeyStatus> {
        Ok(self
            .get(key)?
            .map(|r| r.status)
            .unwrap_or(KeyStatus::Pending))
    }

    fn put(&self, key: &str, record: &KeyRecord) -> Result<()> {
        self.keys.insert(key.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    pub fn mark_resolved(&self, key: &str, values: &[Option<f64>]) -> Result<()> {
        self.put(
            key,
            &KeyRecord {
                status: KeyStatus::Resolved,
                values: values.to_vec(),
            },
        )
    }

    /// Mark a key failed. Failed keys are retried by the next run.
    pub fn mark_failed(&self, key: &str) -> Result<()> {
        self.put(
            key,
            &KeyRecord {
                status: KeyStatus::Failed,
                values: Vec::new(),
            },
        )
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("Failed to flush run state")?;
        Ok(())
    }

    pub fn counts(&self) -> Result<StateCounts> {
        let mut counts = StateCounts::default();
        for entry in self.keys.iter() {
            let (_, bytes) = entry?;
            let record: KeyRecord = serde_json::from_slice(&bytes)?;
            match record.status {
                KeyStatus::Pending => counts.pending += 1,
                KeyStatus::Resolved => counts.resolved += 1,
                KeyStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        {
            let state = RunState::open(&path).unwrap();
            assert_eq!(state.status("a").unwrap(), KeyStatus::Pending);
            state.mark_resolved("a", &[Some(1.0), None]).unwrap();
            state.mark_failed("b").unwrap();
            state.flush().unwrap();
        }

        let state = RunState::open(&path).unwrap();
        let a = state.get("a").unwrap().unwrap();
        assert_eq!(a.status, KeyStatus::Resolved);
        assert_eq!(a.values, vec![Some(1.0), None]);
        assert_eq!(state.status("b").unwrap(), KeyStatus::Failed);
        assert_eq!(
            state.counts().unwrap(),
            StateCounts {
                pending: 0,
                resolved: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn test_input_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::open(&dir.path().join("state")).unwrap();
        assert!(state.check_input("coords.csv", 42).unwrap());
        assert!(state.check_input("coords.csv", 42).unwrap());
        assert!(!state.check_input("coords.csv", 43).unwrap());
    }
}
