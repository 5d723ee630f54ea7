// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable tenant and credential records: apps, API secrets, per-platform
//! push credentials, and the admin provisioning rows.

use rand::RngCore;
use sqlx::PgPool;
use thiserror::Error;

use crate::errors::StorageError;

mod admin;
mod apps;
mod credentials;

pub use admin::{
    AdminBootstrap, AdminUser, ProvisionedAdminSettings, hash_password, is_weak_path,
    normalize_base_path, verify_password,
};
pub use apps::{App, AppConfig};
pub use credentials::{AndroidConfig, AndroidCredentialUpload, IosConfig, IosCredentialUpload};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("app already exists")]
    DuplicateApp,
    #[error("unknown app")]
    UnknownApp,
    #[error("invalid credential material: {0}")]
    InvalidCredential(String),
    #[error("invalid admin base path: {0}")]
    InvalidBasePath(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.into())
    }
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    pool: PgPool,
}

impl CredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Lower-case hex string over `bytes` freshly drawn random bytes.
pub(crate) fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_hex_has_the_requested_width() {
        let secret = random_hex(32);
        assert_eq!(secret.len(), 64);
        assert!(secret.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(random_hex(32), secret);
    }
}
