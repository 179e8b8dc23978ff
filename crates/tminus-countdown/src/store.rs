//! Countdown record store.
//!
//! The store is the source of truth for countdowns; scheduled jobs are
//! derived from it. Each operation is atomic on its own, but no multi-call
//! transactions are offered.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::{Countdown, CountdownUpdate, OwnerId, StoreError};

/// Persistent countdown records, keyed by `(owner, name)`.
#[async_trait]
pub trait CountdownStore: Send + Sync {
    /// Look up one countdown.
    async fn find(&self, owner_id: OwnerId, name: &str) -> Result<Option<Countdown>, StoreError>;

    /// Names of the owner's countdowns, sorted.
    async fn list_names(&self, owner_id: OwnerId) -> Result<Vec<String>, StoreError>;

    /// Add a countdown. Fails with [`StoreError::Conflict`] if the name is taken.
    async fn insert(&self, countdown: Countdown) -> Result<(), StoreError>;

    /// Apply `update` and return the updated record, or `None` if absent.
    async fn update(
        &self,
        owner_id: OwnerId,
        name: &str,
        update: CountdownUpdate,
    ) -> Result<Option<Countdown>, StoreError>;

    /// Remove a countdown and return it, or `None` if absent.
    async fn delete(&self, owner_id: OwnerId, name: &str) -> Result<Option<Countdown>, StoreError>;

    /// Every countdown of every owner.
    async fn list_all(&self) -> Result<Vec<Countdown>, StoreError>;
}

type RecordKey = (OwnerId, String);
type Records = BTreeMap<RecordKey, Countdown>;

fn record_key(owner_id: OwnerId, name: &str) -> RecordKey {
    (owner_id, name.to_string())
}

fn names_of(records: &Records, owner_id: OwnerId) -> Vec<String> {
    records
        .keys()
        .filter(|(owner, _)| *owner == owner_id)
        .map(|(_, name)| name.clone())
        .collect()
}

fn insert_record(records: &mut Records, countdown: Countdown) -> Result<(), StoreError> {
    let key = record_key(countdown.owner_id, &countdown.name);
    if records.contains_key(&key) {
        return Err(StoreError::Conflict {
            owner_id: countdown.owner_id,
            name: countdown.name,
        });
    }
    records.insert(key, countdown);
    Ok(())
}

fn update_record(
    records: &mut Records,
    owner_id: OwnerId,
    name: &str,
    update: &CountdownUpdate,
) -> Result<Option<Countdown>, StoreError> {
    let key = record_key(owner_id, name);
    let Some(mut countdown) = records.get(&key).cloned() else {
        return Ok(None);
    };

    if let Some(new_name) = &update.name
        && new_name != name
        && records.contains_key(&record_key(owner_id, new_name))
    {
        return Err(StoreError::Conflict {
            owner_id,
            name: new_name.clone(),
        });
    }

    countdown.apply(update);
    records.remove(&key);
    records.insert(record_key(owner_id, &countdown.name), countdown.clone());
    Ok(Some(countdown))
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CountdownStore for MemoryStore {
    async fn find(&self, owner_id: OwnerId, name: &str) -> Result<Option<Countdown>, StoreError> {
        Ok(self.records.read().await.get(&record_key(owner_id, name)).cloned())
    }

    async fn list_names(&self, owner_id: OwnerId) -> Result<Vec<String>, StoreError> {
        Ok(names_of(&*self.records.read().await, owner_id))
    }

    async fn insert(&self, countdown: Countdown) -> Result<(), StoreError> {
        insert_record(&mut *self.records.write().await, countdown)
    }

    async fn update(
        &self,
        owner_id: OwnerId,
        name: &str,
        update: CountdownUpdate,
    ) -> Result<Option<Countdown>, StoreError> {
        update_record(&mut *self.records.write().await, owner_id, name, &update)
    }

    async fn delete(&self, owner_id: OwnerId, name: &str) -> Result<Option<Countdown>, StoreError> {
        Ok(self.records.write().await.remove(&record_key(owner_id, name)))
    }

    async fn list_all(&self) -> Result<Vec<Countdown>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// Store backed by a JSON file holding an array of countdowns.
///
/// Records are kept in memory and the whole file is rewritten after every
/// mutation. A mutation only takes effect in memory once the file write has
/// succeeded.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file doesn't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let countdowns: Vec<Countdown> = serde_json::from_slice(&bytes)?;
                let mut records = Records::new();
                for countdown in countdowns {
                    insert_record(&mut records, countdown)?;
                }
                records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Records::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), count = records.len(), "opened countdown store");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn persist(&self, records: &Records) -> Result<(), StoreError> {
        let countdowns: Vec<&Countdown> = records.values().collect();
        let json = serde_json::to_vec_pretty(&countdowns)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), count = countdowns.len(), "persisted countdowns");
        Ok(())
    }

    /// Apply `mutate` to a copy, persist it, then swap it in.
    async fn mutate<T>(
        &self,
        mutate: impl FnOnce(&mut Records) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let result = mutate(&mut next)?;
        self.persist(&next).await?;
        *records = next;
        Ok(result)
    }
}

#[async_trait]
impl CountdownStore for JsonFileStore {
    async fn find(&self, owner_id: OwnerId, name: &str) -> Result<Option<Countdown>, StoreError> {
        Ok(self.records.lock().await.get(&record_key(owner_id, name)).cloned())
    }

    async fn list_names(&self, owner_id: OwnerId) -> Result<Vec<String>, StoreError> {
        Ok(names_of(&*self.records.lock().await, owner_id))
    }

    async fn insert(&self, countdown: Countdown) -> Result<(), StoreError> {
        self.mutate(|records| insert_record(records, countdown)).await
    }

    async fn update(
        &self,
        owner_id: OwnerId,
        name: &str,
        update: CountdownUpdate,
    ) -> Result<Option<Countdown>, StoreError> {
        self.mutate(|records| update_record(records, owner_id, name, &update))
            .await
    }

    async fn delete(&self, owner_id: OwnerId, name: &str) -> Result<Option<Countdown>, StoreError> {
        self.mutate(|records| Ok(records.remove(&record_key(owner_id, name))))
            .await
    }

    async fn list_all(&self) -> Result<Vec<Countdown>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}
