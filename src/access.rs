//! Local access gate
//!
//! Optional username/password lock in front of the tracker. Only SHA-256
//! digests of the credentials are stored; a successful login writes a
//! session that expires after the configured duration. With no
//! credentials set up the tracker is open.

use crate::error::{HabitError, Result};
use crate::store::{keys, LocalStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MIN_PASSWORD_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_hash: String,
    pub pass_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Expiry, epoch milliseconds
    pub valid_until: i64,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() < self.valid_until
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.valid_until)
    }
}

/// Hex-encoded SHA-256 of `input`
pub fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[derive(Clone)]
pub struct AccessGate {
    store: LocalStore,
    session_duration: chrono::Duration,
}

impl AccessGate {
    pub fn new(store: LocalStore, session_duration: chrono::Duration) -> Self {
        Self {
            store,
            session_duration,
        }
    }

    fn credentials(&self) -> Option<Credentials> {
        self.store
            .load::<Option<Credentials>>(keys::CREDENTIALS, None)
            .filter(|c| !c.user_hash.is_empty() && !c.pass_hash.is_empty())
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }

    pub fn session(&self) -> Option<Session> {
        self.store.load(keys::SESSION, None)
    }

    pub fn is_unlocked(&self) -> bool {
        self.is_unlocked_at(Utc::now())
    }

    pub fn is_unlocked_at(&self, now: DateTime<Utc>) -> bool {
        if !self.has_credentials() {
            return true;
        }
        self.session().map(|s| s.is_valid_at(now)).unwrap_or(false)
    }

    pub fn require_unlocked(&self) -> Result<()> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(HabitError::SessionExpired)
        }
    }

    /// Store new credentials. Replacing existing ones needs a valid session.
    pub fn setup(&self, username: &str, password: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(HabitError::Validation("Username must not be empty".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(HabitError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        self.require_unlocked()?;

        let credentials = Credentials {
            user_hash: digest(username),
            pass_hash: digest(password),
        };
        self.store.save(keys::CREDENTIALS, &credentials);
        self.store.remove(keys::SESSION);
        log::info!("Login credentials updated");
        Ok(())
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        self.login_at(username, password, Utc::now())
    }

    pub fn login_at(&self, username: &str, password: &str, now: DateTime<Utc>) -> Result<Session> {
        let credentials = self.credentials().ok_or_else(|| {
            HabitError::Validation("No login has been set up".to_string())
        })?;

        if digest(username.trim()) != credentials.user_hash
            || digest(password) != credentials.pass_hash
        {
            log::warn!("Rejected login attempt");
            return Err(HabitError::AccessDenied);
        }

        let valid_until = now.checked_add_signed(self.session_duration).ok_or_else(|| {
            HabitError::Validation("Session duration is out of range".to_string())
        })?;
        let session = Session {
            valid_until: valid_until.timestamp_millis(),
        };
        self.store.save(keys::SESSION, &session);
        Ok(session)
    }

    pub fn logout(&self) {
        self.store.remove(keys::SESSION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AccessGate {
        AccessGate::new(LocalStore::in_memory().unwrap(), chrono::Duration::hours(1))
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_open_without_credentials() {
        let gate = gate();
        assert!(!gate.has_credentials());
        assert!(gate.is_unlocked());
        assert!(gate.login("me", "pass").is_err());
    }

    #[test]
    fn test_setup_validation() {
        let gate = gate();
        assert!(matches!(gate.setup("  ", "secret"), Err(HabitError::Validation(_))));
        assert!(matches!(gate.setup("me", "abc"), Err(HabitError::Validation(_))));
        assert!(!gate.has_credentials());
    }

    #[test]
    fn test_login_and_expiry() {
        let gate = gate();
        gate.setup("me", "secret").unwrap();
        assert!(!gate.is_unlocked());
        assert!(matches!(gate.require_unlocked(), Err(HabitError::SessionExpired)));

        assert!(matches!(gate.login("me", "wrong"), Err(HabitError::AccessDenied)));

        let now = Utc::now();
        let session = gate.login_at(" me ", "secret", now).unwrap();
        assert!(gate.is_unlocked_at(now));
        assert!(!gate.is_unlocked_at(now + chrono::Duration::hours(2)));
        assert_eq!(session.expires_at().unwrap().timestamp_millis(), session.valid_until);

        gate.logout();
        assert!(!gate.is_unlocked_at(now));
    }

    #[test]
    fn test_oversized_session_is_rejected() {
        let gate = AccessGate::new(
            LocalStore::in_memory().unwrap(),
            chrono::Duration::hours(i64::from(u32::MAX)),
        );
        gate.setup("me", "secret").unwrap();

        assert!(matches!(gate.login("me", "secret"), Err(HabitError::Validation(_))));
        assert!(!gate.is_unlocked());
    }

    #[test]
    fn test_replacing_credentials_requires_session() {
        let gate = gate();
        gate.setup("me", "secret").unwrap();
        assert!(matches!(gate.setup("you", "other"), Err(HabitError::SessionExpired)));

        gate.login("me", "secret").unwrap();
        gate.setup("you", "other").unwrap();
        assert!(gate.login("you", "other").is_ok());
    }
}
