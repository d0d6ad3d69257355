use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Database;
use crate::error::Result;
use crate::models::{RotateOutcome, SessionRow};

impl Database {
    pub fn insert_session(&self, row: SessionRow) -> Result<()> {
        self.sessions.with_data_mut(|sessions| {
            sessions.insert(row.session_id, row);
            Ok(())
        })
    }

    pub fn get_session(&self, id: Uuid) -> Result<Option<SessionRow>> {
        self.sessions.with_data(|sessions| Ok(sessions.get(&id).cloned()))
    }

    /// Swap the session's refresh digest for `new_hash` if `presented_hash`
    /// is the current one. Presenting the digest that was rotated out last
    /// revokes the session.
    pub fn rotate_refresh(
        &self,
        id: Uuid,
        presented_hash: &str,
        new_hash: String,
        new_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        self.sessions.with_data_mut(|sessions| {
            let Some(session) = sessions.get_mut(&id) else {
                return Ok(RotateOutcome::Invalid);
            };
            if !session.is_live(now) {
                return Ok(RotateOutcome::Invalid);
            }

            if session.refresh_token_hash == presented_hash {
                let old = std::mem::replace(&mut session.refresh_token_hash, new_hash);
                session.previous_refresh_hash = Some(old);
                session.expires_at = new_expiry;
                Ok(RotateOutcome::Rotated(session.clone()))
            } else if session.previous_refresh_hash.as_deref() == Some(presented_hash) {
                session.revoked = true;
                Ok(RotateOutcome::Reused)
            } else {
                Ok(RotateOutcome::Invalid)
            }
        })
    }

    /// Returns false if there was no such session.
    pub fn revoke_session(&self, id: Uuid) -> Result<bool> {
        self.sessions.with_data_mut(|sessions| {
            Ok(sessions
                .get_mut(&id)
                .map(|s| s.revoked = true)
                .is_some())
        })
    }

    pub fn revoke_user_sessions(&self, user_id: Uuid) -> Result<usize> {
        self.sessions.with_data_mut(|sessions| {
            let mut count = 0;
            for session in sessions.values_mut().filter(|s| s.user_id == user_id && !s.revoked) {
                session.revoked = true;
                count += 1;
            }
            Ok(count)
        })
    }

    /// Drop sessions that are expired or revoked. Returns how many were removed.
    pub fn purge_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.sessions.with_data_mut(|sessions| {
            let before = sessions.len();
            sessions.retain(|_, s| s.is_live(now));
            Ok(before - sessions.len())
        })
    }
}
