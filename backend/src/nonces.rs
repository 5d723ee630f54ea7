// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Replay protection: at-most-once acceptance of a (tenant, nonce) pair
//! within its validity window.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::errors::StorageError;

#[derive(Debug, Clone)]
pub struct NonceStore {
    pool: PgPool,
}

impl NonceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record `(app_id, nonce)` iff no live row for that key exists.
    ///
    /// Returns `true` iff the row was inserted, i.e. the nonce is fresh.
    /// Expired rows are purged opportunistically first, so a nonce becomes
    /// acceptable again once its previous registration has lapsed. The
    /// insert relies on the composite primary key: under concurrent calls
    /// for the same pair, exactly one caller observes `true`.
    pub async fn consume(
        &self,
        app_id: &str,
        nonce: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        sqlx::query("DELETE FROM nonces WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            "INSERT INTO nonces (app_id, nonce, created_at, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (app_id, nonce) DO NOTHING",
        )
        .bind(app_id)
        .bind(nonce)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
