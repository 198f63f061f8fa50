//! Session credential loading.
//!
//! The interactive login flow runs outside the engine and writes one JSON
//! credential file per account. The engine only reads those files at
//! startup and refuses to run with a missing or expired credential.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// A durable session credential produced by the login collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCredential {
    /// Account identifier on the venue.
    pub account: String,
    /// Bearer token presented on every authenticated request.
    pub token: String,
    /// Token expiry as stamped by the login flow.
    pub expires_at: DateTime<Utc>,
}

impl SessionCredential {
    /// Load and validate a credential file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Credential file {:?} not found - run the login flow first",
                path
            )
        })?;

        let credential: SessionCredential = serde_json::from_str(&raw)
            .with_context(|| format!("Credential file {:?} is malformed", path))?;

        anyhow::ensure!(
            !credential.is_expired(Utc::now()),
            "Credential for {} expired at {} - re-run the login flow",
            credential.account,
            credential.expires_at
        );

        info!(
            account = %credential.account,
            expires_at = %credential.expires_at,
            "Loaded session credential"
        );

        Ok(credential)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_credential() {
        let expires = Utc::now() + Duration::hours(8);
        let path = write_temp(
            "dual_taker_cred_valid.json",
            &format!(
                r#"{{"account": "0xabc", "token": "jwt-token", "expires_at": "{}"}}"#,
                expires.to_rfc3339()
            ),
        );

        let credential = SessionCredential::load(&path).unwrap();
        assert_eq!(credential.account, "0xabc");
        assert!(!credential.is_expired(Utc::now()));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_expired_credential_fails_fast() {
        let expires = Utc::now() - Duration::minutes(1);
        let path = write_temp(
            "dual_taker_cred_expired.json",
            &format!(
                r#"{{"account": "0xabc", "token": "jwt-token", "expires_at": "{}"}}"#,
                expires.to_rfc3339()
            ),
        );

        assert!(SessionCredential::load(&path).is_err());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_fails_fast() {
        assert!(SessionCredential::load("/nonexistent/auth.json").is_err());
    }

    #[test]
    fn test_malformed_file_fails_fast() {
        let path = write_temp("dual_taker_cred_bad.json", "{not json");
        assert!(SessionCredential::load(&path).is_err());
        std::fs::remove_file(path).ok();
    }
}
