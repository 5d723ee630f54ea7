// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Admin provisioning: the mount path and session secret of the admin
//! surface, and the bootstrap admin user. All of it is idempotent so that
//! restarts are no-ops.

use rand::RngCore;
use scrypt::Params;
use sqlx::FromRow;
use subtle::ConstantTimeEq;

use super::{CredentialStore, StoreError, random_hex};
use crate::errors::StorageError;

const SETTING_BASE_PATH: &str = "admin_base_path";
const SETTING_SESSION_SECRET: &str = "admin_session_secret";

const WEAK_PATH_MARKERS: [&str; 4] = ["admin", "panel", "manage", "sys"];
const MIN_STRONG_PATH_LENGTH: usize = 12;

const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SCRYPT_DK_LENGTH: usize = 64;
const SCRYPT_SALT_LENGTH: usize = 16;

#[derive(Debug, Clone, FromRow)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

/// Outcome of [`CredentialStore::ensure_admin_settings`].
#[derive(Debug, Clone)]
pub struct ProvisionedAdminSettings {
    pub base_path: String,
    pub session_secret: String,
    pub generated_path: bool,
    pub generated_secret: bool,
    pub weak_path: bool,
}

/// Outcome of [`CredentialStore::ensure_admin_user`]. A generated password
/// is reported exactly once, on the boot that created the user.
#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub created: bool,
    pub username: String,
    pub generated_password: Option<String>,
}

impl CredentialStore {
    /// Provision the admin mount path and session secret on first boot;
    /// later boots return the stored values untouched.
    pub async fn ensure_admin_settings(
        &self,
        desired_path: Option<&str>,
        desired_secret: Option<&str>,
    ) -> Result<ProvisionedAdminSettings, StoreError> {
        let path_candidate = match desired_path {
            Some(raw) => normalize_base_path(raw)?,
            None => format!("/{}", random_hex(10)),
        };
        let (base_path, path_inserted) =
            self.ensure_setting(SETTING_BASE_PATH, &path_candidate).await?;

        let secret_candidate = match desired_secret {
            Some(secret) => secret.to_owned(),
            None => random_hex(32),
        };
        let (session_secret, secret_inserted) = self
            .ensure_setting(SETTING_SESSION_SECRET, &secret_candidate)
            .await?;

        Ok(ProvisionedAdminSettings {
            weak_path: is_weak_path(&base_path),
            base_path,
            session_secret,
            generated_path: path_inserted && desired_path.is_none(),
            generated_secret: secret_inserted && desired_secret.is_none(),
        })
    }

    /// Insert the key iff absent, then read the authoritative value back.
    async fn ensure_setting(
        &self,
        key: &str,
        candidate: &str,
    ) -> Result<(String, bool), StorageError> {
        let result = sqlx::query(
            "INSERT INTO admin_settings (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(candidate)
        .execute(self.pool())
        .await?;

        let value: String = sqlx::query_scalar("SELECT value FROM admin_settings WHERE key = $1")
            .bind(key)
            .fetch_one(self.pool())
            .await?;

        Ok((value, result.rows_affected() == 1))
    }

    /// Seed the first admin user. Inserts exactly one row iff none exists.
    pub async fn ensure_admin_user(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<AdminBootstrap, StoreError> {
        let username = username.unwrap_or("admin").to_owned();

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM admin_users)")
            .fetch_one(self.pool())
            .await
            .map_err(StorageError::from)?;
        if exists {
            return Ok(AdminBootstrap {
                created: false,
                username,
                generated_password: None,
            });
        }

        let (password, generated) = match password {
            Some(p) => (p.to_owned(), false),
            None => (random_hex(12), true),
        };
        let password_hash = hash_password(&password);

        let result = sqlx::query(
            "INSERT INTO admin_users (username, password_hash) VALUES ($1, $2)
             ON CONFLICT (username) DO NOTHING",
        )
        .bind(&username)
        .bind(&password_hash)
        .execute(self.pool())
        .await
        .map_err(StorageError::from)?;

        let created = result.rows_affected() == 1;
        Ok(AdminBootstrap {
            created,
            username,
            generated_password: (created && generated).then_some(password),
        })
    }

    pub async fn get_admin_by_username(
        &self,
        username: &str,
    ) -> Result<Option<AdminUser>, StorageError> {
        let admin = sqlx::query_as::<_, AdminUser>(
            "SELECT id, username, password_hash FROM admin_users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await?;
        Ok(admin)
    }

    pub async fn update_admin_password(
        &self,
        username: &str,
        new_password: &str,
    ) -> Result<bool, StorageError> {
        let password_hash = hash_password(new_password);
        let result = sqlx::query("UPDATE admin_users SET password_hash = $2 WHERE username = $1")
            .bind(username)
            .bind(&password_hash)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// Normalize a caller-supplied admin mount path: leading `/` enforced,
/// trailing `/` trimmed, whitespace and empty paths rejected.
pub fn normalize_base_path(raw: &str) -> Result<String, StoreError> {
    if raw.is_empty() {
        return Err(StoreError::InvalidBasePath("path must not be empty".into()));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(StoreError::InvalidBasePath(
            "path must not contain whitespace".into(),
        ));
    }
    let mut path = if raw.starts_with('/') {
        raw.to_owned()
    } else {
        format!("/{raw}")
    };
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if path == "/" {
        return Err(StoreError::InvalidBasePath("path must not be empty".into()));
    }
    Ok(path)
}

/// A mount path is weak when it is short or contains a guessable marker.
pub fn is_weak_path(path: &str) -> bool {
    if path.len() < MIN_STRONG_PATH_LENGTH {
        return true;
    }
    let lowered = path.to_lowercase();
    WEAK_PATH_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Hash a password as `scrypt:<salt_hex>:<dk_hex>` with a fresh 16-byte
/// salt and a 64-byte derived key.
pub fn hash_password(password: &str) -> String {
    let salt = {
        let mut buf = [0u8; SCRYPT_SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        buf
    };
    let mut derived = [0u8; SCRYPT_DK_LENGTH];
    scrypt::scrypt(password.as_bytes(), &salt, &scrypt_params(), &mut derived)
        .expect("derived key length is non-zero");
    format!("scrypt:{}:{}", hex::encode(salt), hex::encode(derived))
}

/// Constant-time verification against a stored `scrypt:` hash.
pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.split(':');
    let (Some("scrypt"), Some(salt_hex), Some(dk_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(dk_hex)) else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }
    let mut derived = vec![0u8; expected.len()];
    if scrypt::scrypt(password.as_bytes(), &salt, &scrypt_params(), &mut derived).is_err() {
        return false;
    }
    derived.ct_eq(expected.as_slice()).into()
}

fn scrypt_params() -> Params {
    Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_DK_LENGTH)
        .expect("valid scrypt parameters")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_has_the_documented_format() {
        let hash = hash_password("hunter2");
        let parts: Vec<&str> = hash.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "scrypt");
        assert_eq!(parts[1].len(), SCRYPT_SALT_LENGTH * 2);
        assert_eq!(parts[2].len(), SCRYPT_DK_LENGTH * 2);
    }

    #[test]
    fn verify_round_trip() {
        let hash = hash_password("correct horse");
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "correct horsf"));
        assert!(!verify_password(&hash, ""));
    }

    #[test]
    fn verify_rejects_malformed_hashes() {
        assert!(!verify_password("", "pw"));
        assert!(!verify_password("scrypt:zz:zz", "pw"));
        assert!(!verify_password("argon2:00:00", "pw"));
        assert!(!verify_password("scrypt:00", "pw"));
        assert!(!verify_password("scrypt:00:00:00", "pw"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_password("pw"), hash_password("pw"));
    }

    #[test]
    fn base_path_normalization() {
        assert_eq!(normalize_base_path("/ops-console").unwrap(), "/ops-console");
        assert_eq!(normalize_base_path("ops-console").unwrap(), "/ops-console");
        assert_eq!(normalize_base_path("/ops-console///").unwrap(), "/ops-console");
        assert!(normalize_base_path("").is_err());
        assert!(normalize_base_path("/").is_err());
        assert!(normalize_base_path("///").is_err());
        assert!(normalize_base_path("/with space").is_err());
        assert!(normalize_base_path("/with\ttab").is_err());
    }

    #[test]
    fn weak_path_detection() {
        assert!(is_weak_path("/admin-f00dd00d"));
        assert!(is_weak_path("/MyPanel12345"));
        assert!(is_weak_path("/management-x"));
        assert!(is_weak_path("/sysZZZZZZZZZZZ"));
        assert!(is_weak_path("/short"));
        assert!(!is_weak_path("/f3a9c2d4e1b80a7c6d5e"));
    }
}
