// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use nudgetypes::identifiers::AppId;
use serde::Serialize;
use sqlx::FromRow;

use super::{CredentialStore, StoreError, random_hex};
use crate::errors::StorageError;
use crate::store::credentials::{AndroidConfig, IosConfig};

/// A tenant record. The API secret is deliberately not part of this type;
/// it is only ever surfaced by [`CredentialStore::create_app`],
/// [`CredentialStore::rotate_secret`] and the admission-path lookup.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: AppId,
    pub name: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The credential bundle of an enabled tenant, as seen by the data plane.
///
/// Entries whose key material is not inline are omitted so that the send
/// path never dereferences a filesystem path.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_id: AppId,
    pub ios: Option<IosConfig>,
    pub android: Option<AndroidConfig>,
}

impl CredentialStore {
    pub async fn list_apps(&self) -> Result<Vec<App>, StorageError> {
        let apps = sqlx::query_as::<_, App>(
            "SELECT id, name, enabled, created_at, updated_at FROM apps ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(apps)
    }

    pub async fn get_app(&self, app_id: &str) -> Result<Option<App>, StorageError> {
        let app = sqlx::query_as::<_, App>(
            "SELECT id, name, enabled, created_at, updated_at FROM apps WHERE id = $1",
        )
        .bind(app_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(app)
    }

    /// Create a tenant with a fresh 64-hex API secret. The secret is
    /// returned exactly once.
    pub async fn create_app(&self, app_id: &AppId, name: &str) -> Result<(App, String), StoreError> {
        let api_secret = random_hex(32);
        let result = sqlx::query_as::<_, App>(
            "INSERT INTO apps (id, name, api_secret)
             VALUES ($1, $2, $3)
             RETURNING id, name, enabled, created_at, updated_at",
        )
        .bind(app_id)
        .bind(name)
        .bind(&api_secret)
        .fetch_one(self.pool())
        .await;

        match result {
            Ok(app) => Ok((app, api_secret)),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateApp),
            Err(e) => Err(e.into()),
        }
    }

    /// Update name and/or enabled flag. Returns the updated record, or
    /// `None` for an unknown app.
    pub async fn update_app(
        &self,
        app_id: &str,
        name: Option<&str>,
        enabled: Option<bool>,
    ) -> Result<Option<App>, StorageError> {
        let app = sqlx::query_as::<_, App>(
            "UPDATE apps
             SET name = COALESCE($2, name),
                 enabled = COALESCE($3, enabled),
                 updated_at = now()
             WHERE id = $1
             RETURNING id, name, enabled, created_at, updated_at",
        )
        .bind(app_id)
        .bind(name)
        .bind(enabled)
        .fetch_optional(self.pool())
        .await?;
        Ok(app)
    }

    /// Atomically replace the API secret. No history is retained.
    pub async fn rotate_secret(&self, app_id: &str) -> Result<Option<String>, StorageError> {
        let api_secret = random_hex(32);
        let result = sqlx::query(
            "UPDATE apps SET api_secret = $2, updated_at = now() WHERE id = $1",
        )
        .bind(app_id)
        .bind(&api_secret)
        .execute(self.pool())
        .await?;
        Ok((result.rows_affected() == 1).then_some(api_secret))
    }

    /// The admission-path secret lookup. A disabled app is
    /// indistinguishable from a missing one.
    pub async fn get_api_secret(&self, app_id: &str) -> Result<Option<String>, StorageError> {
        let secret: Option<String> = sqlx::query_scalar(
            "SELECT api_secret FROM apps WHERE id = $1 AND enabled",
        )
        .bind(app_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(secret)
    }

    /// The dispatch-path credential lookup. Returns `None` for disabled or
    /// missing apps; per-platform entries are present only with inline key
    /// material.
    pub async fn get_app_config(&self, app_id: &str) -> Result<Option<AppConfig>, StorageError> {
        let Some(id) = sqlx::query_scalar::<_, AppId>(
            "SELECT id FROM apps WHERE id = $1 AND enabled",
        )
        .bind(app_id)
        .fetch_optional(self.pool())
        .await?
        else {
            return Ok(None);
        };

        let ios = sqlx::query_as::<_, IosConfig>(
            "SELECT team_id, key_id, private_key, production
             FROM ios_credentials WHERE app_id = $1",
        )
        .bind(app_id)
        .fetch_optional(self.pool())
        .await?
        .filter(IosConfig::is_inline);

        let android = sqlx::query_as::<_, AndroidConfig>(
            "SELECT service_account FROM android_credentials WHERE app_id = $1",
        )
        .bind(app_id)
        .fetch_optional(self.pool())
        .await?
        .filter(AndroidConfig::is_inline);

        Ok(Some(AppConfig {
            app_id: id,
            ios,
            android,
        }))
    }
}

pub(super) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

pub(super) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_foreign_key_violation())
}
