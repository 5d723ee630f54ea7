// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use config::{Config, ConfigError};
use nudgebackend::settings::Settings;

/// Load the gateway configuration from the process environment.
///
/// Every documented variable maps to a [`Settings`] field by lower-casing,
/// e.g. `RATE_LIMIT_MAX` → `rate_limit_max`. `DATABASE_URL` is the only
/// required variable.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let builder =
        Config::builder().add_source(config::Environment::default().try_parsing(true));
    builder.build()?.try_deserialize()
}
