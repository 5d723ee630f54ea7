// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashSet;

use serde::Deserialize;

/// Configuration for the gateway, populated from the environment.
///
/// Every field maps to the flat environment variable of the same name in
/// upper case, e.g. `rate_limit_max` ← `RATE_LIMIT_MAX`.
#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default = "defaults::port")]
    pub port: u16,
    pub database_url: String,
    #[serde(default = "defaults::enabled")]
    pub require_hmac: bool,
    /// Defaults to the inverse of `require_hmac`; see [`Settings::require_auth`].
    #[serde(default)]
    pub require_auth: Option<bool>,
    #[serde(default)]
    pub require_https: bool,
    #[serde(default)]
    pub trust_proxy: bool,
    /// Comma-separated list of client addresses admitted when the allowlist
    /// is enabled.
    #[serde(default)]
    pub allowed_ips: Option<String>,
    #[serde(default)]
    pub ip_allowlist_enabled: Option<bool>,
    #[serde(default = "defaults::hmac_window_ms")]
    pub hmac_window_ms: i64,
    #[serde(default = "defaults::rate_limit_window_ms")]
    pub rate_limit_window_ms: i64,
    #[serde(default = "defaults::rate_limit_max")]
    pub rate_limit_max: u64,
    #[serde(default = "defaults::body_limit")]
    pub body_limit: usize,
    #[serde(default)]
    pub admin_base_path: Option<String>,
    #[serde(default)]
    pub admin_bootstrap_user: Option<String>,
    #[serde(default)]
    pub admin_bootstrap_password: Option<String>,
    #[serde(default)]
    pub admin_session_secret: Option<String>,
    #[serde(default = "defaults::apns_max_listeners")]
    pub apns_max_listeners: usize,
}

mod defaults {
    pub(super) fn port() -> u16 {
        3000
    }
    pub(super) fn enabled() -> bool {
        true
    }
    pub(super) fn hmac_window_ms() -> i64 {
        300_000
    }
    pub(super) fn rate_limit_window_ms() -> i64 {
        60_000
    }
    pub(super) fn rate_limit_max() -> u64 {
        120
    }
    pub(super) fn body_limit() -> usize {
        200 * 1024
    }
    pub(super) fn apns_max_listeners() -> usize {
        75
    }
}

impl Settings {
    /// Whether the API-key check runs. Explicit setting wins; otherwise the
    /// key check covers for a disabled HMAC stage.
    pub fn require_auth(&self) -> bool {
        self.require_auth.unwrap_or(!self.require_hmac)
    }

    /// The allowlist to enforce, or `None` when the check is disabled.
    ///
    /// Enforcement is driven by `IP_ALLOWLIST_ENABLED` when set, and falls
    /// back to "enabled iff `ALLOWED_IPS` is non-empty".
    pub fn ip_allowlist(&self) -> Option<HashSet<String>> {
        let entries: HashSet<String> = self
            .allowed_ips
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_owned)
            .collect();
        let enabled = self.ip_allowlist_enabled.unwrap_or(!entries.is_empty());
        enabled.then_some(entries)
    }
}
