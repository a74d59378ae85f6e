//! Durable registration store — a single JSON document on disk.
//!
//! Records are loaded into memory on open and the whole document is
//! rewritten on every mutation, via write-to-temp-then-rename so a crash
//! mid-write leaves either the old state or the new state on disk, never a
//! torn file. A corrupt or unreadable document at open degrades to an empty
//! registry with a warning rather than failing startup.
//!
//! Storage location: `<data_dir>/registrations.json`.

use std::path::{Path, PathBuf};

use agentdoor_core::{RegistryError, SiteRegistration};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const STORE_FILE: &str = "registrations.json";

/// One stored tenant: the registration record plus the verbatim OpenAPI
/// document fetched at registration time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRegistration {
    pub registration: SiteRegistration,
    pub spec_json: String,
}

/// The durable `slug → (registration, spec)` mapping.
///
/// Writes are serialized behind the lock; two processes sharing one store
/// file is unsupported.
pub struct Registry {
    path: PathBuf,
    entries: RwLock<Vec<StoredRegistration>>,
}

impl Registry {
    /// Open (or create) the registry under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, RegistryError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| RegistryError::Storage(format!("Failed to create data dir: {e}")))?;
        let path = data_dir.join(STORE_FILE);
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "Registry opened");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn load_from_disk(path: &Path) -> Vec<StoredRegistration> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(), // No file yet — start empty
        };
        match serde_json::from_str::<Vec<StoredRegistration>>(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Registry file corrupt, starting empty");
                Vec::new()
            }
        }
    }

    /// Atomically rewrite the backing document with the current state.
    async fn flush(&self) -> Result<(), RegistryError> {
        let entries = self.entries.read().await;
        let content = serde_json::to_string_pretty(&*entries)?;
        drop(entries);

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content.as_bytes())
            .map_err(|e| RegistryError::Storage(format!("Failed to write registry: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| RegistryError::Storage(format!("Failed to commit registry: {e}")))?;
        Ok(())
    }

    /// Insert or replace a registration together with its spec payload.
    pub async fn register(
        &self,
        registration: SiteRegistration,
        spec_json: String,
    ) -> Result<(), RegistryError> {
        let stored = StoredRegistration {
            registration,
            spec_json,
        };
        {
            let mut entries = self.entries.write().await;
            match entries
                .iter_mut()
                .find(|e| e.registration.slug == stored.registration.slug)
            {
                Some(existing) => *existing = stored,
                None => entries.push(stored),
            }
        }
        self.flush().await
    }

    pub async fn get(&self, slug: &str) -> Option<SiteRegistration> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.registration.slug == slug)
            .map(|e| e.registration.clone())
    }

    /// All registrations, ordered by `created_at` ascending; ties keep
    /// insertion order.
    pub async fn list(&self) -> Vec<SiteRegistration> {
        let mut regs: Vec<SiteRegistration> = self
            .entries
            .read()
            .await
            .iter()
            .map(|e| e.registration.clone())
            .collect();
        regs.sort_by_key(|r| r.created_at);
        regs
    }

    /// Same ordering as [`list`], with the spec payload attached.
    pub async fn list_with_specs(&self) -> Vec<StoredRegistration> {
        let mut entries: Vec<StoredRegistration> = self.entries.read().await.clone();
        entries.sort_by_key(|e| e.registration.created_at);
        entries
    }

    /// Remove a registration. Returns whether it existed.
    pub async fn delete(&self, slug: &str) -> Result<bool, RegistryError> {
        let existed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|e| e.registration.slug != slug);
            entries.len() < before
        };
        if existed {
            self.flush().await?;
        }
        Ok(existed)
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Final flush. The registry is unusable for writes afterwards only by
    /// convention; calling it twice is harmless.
    pub async fn close(&self) -> Result<(), RegistryError> {
        self.flush().await
    }
}
