use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::time;
use tracing::{debug, info, warn};

use super::db::RedbRepository;
use super::error::StoreError;
use super::memory::MemoryRepository;
use super::model::{NewSecret, SecretRecord};
use super::repository::{InsertOutcome, SecretRepository};
use crate::clock::{Clock, SystemClock};
use crate::handle::{HandleGenerator, RandomHandleGenerator};

/// Largest accepted secret, in bytes.
pub const MAX_SECRET_BYTES: usize = 1_048_576;

/// Fresh handles tried before `create` gives up on a run of collisions.
const MAX_HANDLE_ATTEMPTS: usize = 5;

/// Result of a secret retrieval.
#[derive(Debug, PartialEq)]
pub enum ConsumeResult {
    /// One view was spent. The record carries the remaining count after this read.
    Consumed(SecretRecord),
    /// Never existed, expired, or out of views. Callers cannot tell which.
    NotFound,
}

/// Owns the secret lifecycle: creation, expiry evaluation and
/// consume-on-read. Holds no state of its own beyond its collaborators.
#[derive(Clone)]
pub struct SecretStore {
    repository: Arc<dyn SecretRepository>,
    handles: Arc<dyn HandleGenerator>,
    clock: Arc<dyn Clock>,
}

impl SecretStore {
    pub fn new(
        repository: Arc<dyn SecretRepository>,
        handles: Arc<dyn HandleGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            handles,
            clock,
        }
    }

    /// Durable store at `path` with random handles of `handle_len` symbols
    /// and the wall clock.
    pub fn open(path: &Path, handle_len: usize) -> Result<Self> {
        let repository = RedbRepository::open(path)?;
        Ok(Self::new(
            Arc::new(repository),
            Arc::new(RandomHandleGenerator::with_len(handle_len)),
            Arc::new(SystemClock),
        ))
    }

    /// Non-durable store, lost on restart.
    pub fn in_memory(handle_len: usize) -> Self {
        Self::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(RandomHandleGenerator::with_len(handle_len)),
            Arc::new(SystemClock),
        )
    }

    /// Store a new secret readable `view_limit` times. A `ttl_minutes` of zero
    /// or less means the secret never expires by time.
    pub fn create(
        &self,
        secret_text: &str,
        view_limit: i64,
        ttl_minutes: i64,
    ) -> Result<SecretRecord, StoreError> {
        if secret_text.is_empty() {
            return Err(StoreError::invalid("secret must not be empty"));
        }
        if secret_text.len() > MAX_SECRET_BYTES {
            return Err(StoreError::invalid("secret exceeds 1 MiB limit"));
        }
        let remaining_views = u32::try_from(view_limit)
            .ok()
            .filter(|&views| views > 0)
            .ok_or_else(|| {
                StoreError::invalid(format!("view limit must be between 1 and {}", u32::MAX))
            })?;

        let created_at = self.clock.now();
        let expires_at = expiry_after(created_at, ttl_minutes)?;

        for attempt in 1..=MAX_HANDLE_ATTEMPTS {
            let secret = NewSecret {
                handle: self.handles.generate()?,
                secret_text: secret_text.to_owned(),
                created_at,
                expires_at,
                remaining_views,
            };
            match self.repository.insert_unique(&secret)? {
                InsertOutcome::Inserted(record) => {
                    debug!(
                        id = record.id,
                        remaining_views,
                        expires_at = ?record.expires_at,
                        "stored secret"
                    );
                    return Ok(record);
                }
                InsertOutcome::DuplicateHandle => {
                    warn!(attempt, "handle collision, regenerating");
                }
            }
        }

        Err(StoreError::Persistence(anyhow!(
            "no unique handle after {MAX_HANDLE_ATTEMPTS} attempts"
        )))
    }

    /// Spend one view of the secret behind `handle`.
    ///
    /// The final check-and-decrement happens inside the repository, so
    /// concurrent callers can never spend more views than the record holds.
    pub fn consume(&self, handle: &str) -> Result<ConsumeResult, StoreError> {
        let now = self.clock.now();

        let Some(record) = self.repository.find_by_handle(handle)? else {
            return Ok(ConsumeResult::NotFound);
        };
        if !record.is_available(now) {
            debug!(id = record.id, "secret unavailable");
            return Ok(ConsumeResult::NotFound);
        }

        match self.repository.update_if_views_positive(handle, now)? {
            Some(updated) => {
                debug!(
                    id = updated.id,
                    remaining_views = updated.remaining_views,
                    "consumed secret"
                );
                Ok(ConsumeResult::Consumed(updated))
            }
            // Another reader took the last view between the lookup and the update.
            None => Ok(ConsumeResult::NotFound),
        }
    }

    /// Physically delete expired and exhausted secrets. Returns their handles.
    pub fn prune(&self) -> Result<Vec<String>> {
        self.repository.remove_unavailable(self.clock.now())
    }

    /// Spawn a background Tokio task that calls `prune()` every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                match self.prune() {
                    Ok(removed) if !removed.is_empty() => {
                        info!(removed = removed.len(), "background sweep");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "background sweep error"),
                }
            }
        });
    }
}

fn expiry_after(
    created_at: DateTime<Utc>,
    ttl_minutes: i64,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    if ttl_minutes <= 0 {
        return Ok(None);
    }
    TimeDelta::try_minutes(ttl_minutes)
        .and_then(|ttl| created_at.checked_add_signed(ttl))
        .map(Some)
        .ok_or_else(|| StoreError::invalid(format!("ttl of {ttl_minutes} minutes is out of range")))
}
