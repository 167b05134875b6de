use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::storage::{KeyValueStore, SESSION_KEY, TOKEN_KEY};

/// Buffer before expiry inside which the session is silently revalidated (5 minutes)
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

/// Account profile returned by `/auth/login` and `/auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// The authenticated session. Persisted as-is under [`SESSION_KEY`], with
/// timestamps as ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: UserInfo,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Returns `None` unless `expires_in` is positive, so `expires_at > issued_at` always holds.
    pub fn new(token: String, user: UserInfo, issued_at: DateTime<Utc>, expires_in: Duration) -> Option<Self> {
        if expires_in <= Duration::zero() {
            return None;
        }
        Some(Self {
            token,
            user,
            issued_at,
            expires_at: issued_at.checked_add_signed(expires_in)?,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check if the session will expire within `buffer` and should be revalidated
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expires_at - now <= buffer
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Write the raw token and the session record together.
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let record = serde_json::to_string(self).context("Failed to serialize session")?;
        store.set(TOKEN_KEY, &self.token)?;
        store.set(SESSION_KEY, &record)?;
        Ok(())
    }

    /// Load the persisted session record, if any.
    ///
    /// A record that no longer parses, or whose invariant is broken, is
    /// treated as absent.
    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Self>> {
        let Some(contents) = store.get(SESSION_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Session>(&contents) {
            Ok(session) if session.expires_at > session.issued_at => Ok(Some(session)),
            Ok(_) => {
                tracing::warn!("Persisted session has expiry before issue time, ignoring");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse persisted session, ignoring");
                Ok(None)
            }
        }
    }

    /// Remove both persisted entries. Attempts both even if the first fails.
    pub fn clear(store: &dyn KeyValueStore) -> Result<()> {
        let token = store.remove(TOKEN_KEY);
        let record = store.remove(SESSION_KEY);
        token.and(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStore;

    fn user() -> UserInfo {
        UserInfo {
            id: 1,
            username: "USER0001".to_string(),
            email: Some("user@carddemo.com".to_string()),
            is_active: true,
        }
    }

    fn session_at(now: DateTime<Utc>) -> Session {
        Session::new("tok".to_string(), user(), now, Duration::seconds(3600)).unwrap()
    }

    #[test]
    fn test_new_rejects_non_positive_expiry() {
        let now = Utc::now();
        assert!(Session::new("t".into(), user(), now, Duration::zero()).is_none());
        assert!(Session::new("t".into(), user(), now, Duration::seconds(-5)).is_none());
    }

    #[test]
    fn test_expiry_boundaries() {
        let t0 = Utc::now();
        let session = session_at(t0);

        assert_eq!(session.expires_at, t0 + Duration::seconds(3600));
        assert!(!session.is_expired(t0 + Duration::seconds(3599)));
        assert!(session.is_expired(t0 + Duration::seconds(3600)));
        assert_eq!(session.time_until_expiry(t0 + Duration::seconds(4000)), Duration::zero());
    }

    #[test]
    fn test_needs_refresh_inside_buffer() {
        let t0 = Utc::now();
        let session = session_at(t0);
        let buffer = Duration::seconds(DEFAULT_REFRESH_BUFFER_SECS);

        assert!(!session.needs_refresh(t0 + Duration::seconds(3000), buffer));
        assert!(session.needs_refresh(t0 + Duration::seconds(3300), buffer));
        assert!(session.needs_refresh(t0 + Duration::seconds(3500), buffer));
    }

    #[test]
    fn test_save_load_clear() {
        let store = MemoryStore::new();
        let session = session_at(Utc::now());

        session.save(&store).unwrap();
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("tok"));

        let record: serde_json::Value =
            serde_json::from_str(&store.get(SESSION_KEY).unwrap().unwrap()).unwrap();
        assert!(record.get("expiresAt").and_then(|v| v.as_str()).is_some());
        assert_eq!(record["token"], "tok");

        assert_eq!(Session::load(&store).unwrap(), Some(session));

        Session::clear(&store).unwrap();
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
        assert_eq!(Session::load(&store).unwrap(), None);
    }

    #[test]
    fn test_corrupt_record_is_absent() {
        let store = MemoryStore::new();
        store.set(SESSION_KEY, "not json").unwrap();
        assert_eq!(Session::load(&store).unwrap(), None);
    }
}
