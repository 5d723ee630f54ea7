// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The provider multiplexer: process-local caches of long-lived APNs and
//! FCM clients keyed by tenant, with batching and invalid-token
//! classification.

use nudgetypes::identifiers::AppId;
use thiserror::Error;

pub mod apns;
pub mod fcm;

pub use apns::ApnsPool;
pub use fcm::FcmPool;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("invalid provider configuration: {0}")]
    InvalidConfiguration(String),
    #[error("could not mint provider token: {0}")]
    JwtCreation(String),
    #[error("OAuth2 token exchange failed: {0}")]
    OAuth(String),
    #[error("network error: {0}")]
    Network(String),
}

/// Per-token outcome of a provider exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenOutcome {
    Sent,
    Failed { token: String, invalid: bool },
}

impl TokenOutcome {
    pub(crate) fn failed(token: &str, invalid: bool) -> Self {
        TokenOutcome::Failed {
            token: token.to_owned(),
            invalid,
        }
    }
}

/// Both provider pools, shared across all request handlers.
#[derive(Debug)]
pub struct ProviderPools {
    pub apns: ApnsPool,
    pub fcm: FcmPool,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub apns_clients: usize,
    pub fcm_clients: usize,
    pub apns_in_flight: usize,
}

impl ProviderPools {
    pub fn new(apns_max_in_flight: usize) -> Self {
        Self {
            apns: ApnsPool::new(apns_max_in_flight),
            fcm: FcmPool::new(),
        }
    }

    /// Evict the APNs client of a tenant after an iOS credential write.
    /// Completes only after in-flight sends on the old client have drained.
    pub async fn invalidate_ios(&self, app_id: &AppId) {
        if self.apns.invalidate(app_id).await {
            tracing::info!(%app_id, "Evicted APNs client after credential change");
        }
    }

    /// Evict the FCM client of a tenant after an Android credential write.
    pub async fn invalidate_android(&self, app_id: &AppId) {
        if self.fcm.invalidate(app_id) {
            tracing::info!(%app_id, "Evicted FCM client after credential change");
        }
    }

    /// Drain and drop every cached client. Called once on shutdown.
    pub async fn shutdown(&self) {
        let stats = self.stats();
        self.apns.shutdown().await;
        self.fcm.shutdown();
        tracing::info!(
            apns_clients = stats.apns_clients,
            fcm_clients = stats.fcm_clients,
            "Provider pools shut down"
        );
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            apns_clients: self.apns.client_count(),
            fcm_clients: self.fcm.client_count(),
            apns_in_flight: self.apns.in_flight(),
        }
    }
}
