use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::model::{NewSecret, SecretRecord};
use super::repository::{InsertOutcome, SecretRepository};

/// Secrets keyed by handle.
const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const SECRET_SEQ_KEY: &str = "secret_seq";

/// Leading byte of every stored record. Bump when the layout changes.
const RECORD_V1_MARKER: u8 = 0x01;

/// Durable repository backed by an embedded redb file.
///
/// redb runs one write transaction at a time per database, so the
/// read-check-decrement in `update_if_views_positive` cannot interleave with
/// another writer.
#[derive(Clone)]
pub struct RedbRepository {
    db: Arc<Database>,
}

impl RedbRepository {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.open_table(COUNTERS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl SecretRepository for RedbRepository {
    fn insert_unique(&self, secret: &NewSecret) -> Result<InsertOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(SECRETS)?;
            let taken = table.get(secret.handle.as_str())?.is_some();
            if taken {
                InsertOutcome::DuplicateHandle
            } else {
                let mut counters = write_txn.open_table(COUNTERS)?;
                let id = counters.get(SECRET_SEQ_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
                counters.insert(SECRET_SEQ_KEY, id)?;

                let record = SecretRecord::from_new(id, secret);
                let bytes = encode(&record)?;
                table.insert(record.handle.as_str(), bytes.as_slice())?;
                InsertOutcome::Inserted(record)
            }
        };

        match outcome {
            InsertOutcome::Inserted(_) => write_txn.commit()?,
            InsertOutcome::DuplicateHandle => write_txn.abort()?,
        }
        Ok(outcome)
    }

    fn find_by_handle(&self, handle: &str) -> Result<Option<SecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;

        let raw_bytes: Option<Vec<u8>> = table.get(handle)?.map(|guard| guard.value().to_vec());
        raw_bytes.as_deref().map(decode).transpose()
    }

    fn update_if_views_positive(
        &self,
        handle: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SecretRecord>> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(SECRETS)?;

            // Copy the bytes out so the AccessGuard (which borrows `table`) is
            // dropped before the insert.
            let raw_bytes: Option<Vec<u8>> =
                table.get(handle)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => None,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if record.is_available(now) {
                        record.remaining_views -= 1;
                        let bytes = encode(&record)?;
                        table.insert(handle, bytes.as_slice())?;
                        Some(record)
                    } else {
                        None
                    }
                }
            }
        };

        if updated.is_some() {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(updated)
    }

    fn remove_unavailable(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        // Collect candidates in a read pass first.
        let candidates: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SECRETS)?;
            let mut handles = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                if !decode(v.value())?.is_available(now) {
                    handles.push(k.value().to_owned());
                }
            }
            handles
        };

        if candidates.is_empty() {
            return Ok(vec![]);
        }

        // Unavailability is permanent, so every candidate is still removable.
        let write_txn = self.db.begin_write()?;
        let mut removed = Vec::with_capacity(candidates.len());
        {
            let mut table = write_txn.open_table(SECRETS)?;
            for handle in candidates {
                if table.remove(handle.as_str())?.is_some() {
                    removed.push(handle);
                }
            }
        }
        write_txn.commit()?;

        debug!(removed = removed.len(), checked_at = %now, "redb sweep finished");
        Ok(removed)
    }
}

/// Encode a record as `[RECORD_V1_MARKER] + bincode(record)`.
fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode")?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_V1_MARKER);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    match bytes.split_first() {
        None => anyhow::bail!("empty record"),
        Some((&RECORD_V1_MARKER, payload)) => {
            let (record, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())
                    .context("bincode decode v1")?;
            Ok(record)
        }
        Some((marker, _)) => anyhow::bail!("unknown record format marker {marker:#04x}"),
    }
}
