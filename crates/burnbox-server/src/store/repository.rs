use anyhow::Result;
use chrono::{DateTime, Utc};

use super::model::{NewSecret, SecretRecord};

#[derive(Debug, PartialEq)]
pub enum InsertOutcome {
    Inserted(SecretRecord),
    /// Another record already owns this handle. Nothing was written.
    DuplicateHandle,
}

/// Persistence collaborator for `SecretStore`.
///
/// Implementations must make `update_if_views_positive` atomic with respect
/// to every other caller of the same backing store: two racing calls against a
/// record with one view left must not both return `Some`.
pub trait SecretRepository: Send + Sync {
    /// Persist `secret` under a fresh id unless its handle is taken.
    fn insert_unique(&self, secret: &NewSecret) -> Result<InsertOutcome>;

    fn find_by_handle(&self, handle: &str) -> Result<Option<SecretRecord>>;

    /// Decrement `remaining_views` if the record is still available at `now`.
    /// Returns the updated record, or `None` if nothing changed.
    fn update_if_views_positive(
        &self,
        handle: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SecretRecord>>;

    /// Physically delete records that are time-expired or out of views.
    /// Returns the removed handles.
    fn remove_unavailable(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}
