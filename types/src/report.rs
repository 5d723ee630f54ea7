// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};

/// Aggregate outcome of one platform send.
///
/// `invalid_tokens` is always present (possibly empty) so that callers can
/// prune their token stores without special-casing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
    pub requested: usize,
    pub sent: usize,
    pub failed: usize,
    pub invalid_tokens: Vec<String>,
}

impl SendReport {
    pub fn with_requested(requested: usize) -> Self {
        Self {
            requested,
            ..Default::default()
        }
    }

    /// Fold the outcome of one chunk into the aggregate.
    pub fn absorb(&mut self, other: SendReport) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.invalid_tokens.extend(other.invalid_tokens);
    }
}
