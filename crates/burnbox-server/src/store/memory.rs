use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use super::model::{NewSecret, SecretRecord};
use super::repository::{InsertOutcome, SecretRepository};

/// Process-local repository. Every operation runs under one mutex.
/// Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    last_id: u64,
    records: HashMap<String, SecretRecord>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory repository lock poisoned"))
    }
}

impl SecretRepository for MemoryRepository {
    fn insert_unique(&self, secret: &NewSecret) -> Result<InsertOutcome> {
        let mut inner = self.lock()?;
        if inner.records.contains_key(&secret.handle) {
            return Ok(InsertOutcome::DuplicateHandle);
        }
        inner.last_id += 1;
        let record = SecretRecord::from_new(inner.last_id, secret);
        inner.records.insert(record.handle.clone(), record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    fn find_by_handle(&self, handle: &str) -> Result<Option<SecretRecord>> {
        Ok(self.lock()?.records.get(handle).cloned())
    }

    fn update_if_views_positive(
        &self,
        handle: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SecretRecord>> {
        let mut inner = self.lock()?;
        match inner.records.get_mut(handle) {
            Some(record) if record.is_available(now) => {
                record.remaining_views -= 1;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    fn remove_unavailable(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut inner = self.lock()?;
        let mut removed = Vec::new();
        inner.records.retain(|handle, record| {
            let keep = record.is_available(now);
            if !keep {
                removed.push(handle.clone());
            }
            keep
        });
        Ok(removed)
    }
}
