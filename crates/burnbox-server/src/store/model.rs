use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// A stored secret. Everything except `remaining_views` is fixed at creation.
/// Stored in redb as bincode-encoded bytes behind a format marker.
#[derive(Clone, PartialEq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// Store-assigned identity.
    pub id: u64,
    /// Opaque lookup key handed to readers.
    pub handle: String,
    pub secret_text: String,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    /// `None` means the secret never expires by time.
    #[zeroize(skip)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Successful reads left. Zero means the secret is gone.
    pub remaining_views: u32,
}

impl SecretRecord {
    pub fn from_new(id: u64, secret: &NewSecret) -> Self {
        Self {
            id,
            handle: secret.handle.clone(),
            secret_text: secret.secret_text.clone(),
            created_at: secret.created_at,
            expires_at: secret.expires_at,
            remaining_views: secret.remaining_views,
        }
    }

    pub fn is_time_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_views == 0
    }

    /// True if a read at `now` may succeed.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        !self.is_exhausted() && !self.is_time_expired(now)
    }

    pub fn view(&self) -> SecretView {
        SecretView {
            hash: self.handle.clone(),
            secret_text: self.secret_text.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            remaining_views: self.remaining_views,
        }
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("id", &self.id)
            .field("secret_text", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("remaining_views", &self.remaining_views)
            .finish_non_exhaustive()
    }
}

/// A secret about to be persisted; the repository assigns its `id`.
#[derive(ZeroizeOnDrop)]
pub struct NewSecret {
    pub handle: String,
    pub secret_text: String,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_views: u32,
}

/// External rendering of a secret, shared by the JSON and XML responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "Secret", rename_all = "camelCase")]
pub struct SecretView {
    pub hash: String,
    pub secret_text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_views: u32,
}
