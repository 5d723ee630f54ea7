// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{Database, Decode, Encode, Type, encode::IsNull, error::BoxDynError};
use thiserror::Error;

const APP_ID_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._-";

/// Validated tenant identifier in bundle-id shape, e.g. `com.acme.app`.
///
/// Accepts `[A-Za-z0-9._-]+` with at least one `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppId(String);

impl AppId {
    pub fn new(raw: impl Into<String>) -> Result<Self, AppIdError> {
        let raw = raw.into();
        Self::validate(&raw)?;
        Ok(Self(raw))
    }

    fn validate(raw: &str) -> Result<(), AppIdError> {
        if raw.is_empty() {
            return Err(AppIdError::Empty);
        }
        for c in raw.bytes() {
            if !APP_ID_CHARSET.contains(&c) {
                return Err(AppIdError::InvalidCharacter);
            }
        }
        if !raw.contains('.') {
            return Err(AppIdError::MissingDot);
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppIdError {
    #[error("app id must not be empty")]
    Empty,
    #[error("app id may only contain letters, digits, '.', '_' and '-'")]
    InvalidCharacter,
    #[error("app id must contain at least one '.'")]
    MissingDot,
}

impl FromStr for AppId {
    type Err = AppIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AppId {
    type Error = AppIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AppId> for String {
    fn from(value: AppId) -> Self {
        value.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl<DB: Database> Type<DB> for AppId
where
    String: Type<DB>,
{
    fn type_info() -> DB::TypeInfo {
        <String as Type<DB>>::type_info()
    }
}

impl<'r, DB: Database> Encode<'r, DB> for AppId
where
    String: Encode<'r, DB>,
{
    fn encode_by_ref(
        &self,
        buf: &mut <DB as Database>::ArgumentBuffer<'r>,
    ) -> Result<IsNull, BoxDynError> {
        Encode::<DB>::encode(self.0.clone(), buf)
    }
}

impl<'r, DB: Database> Decode<'r, DB> for AppId
where
    &'r str: Decode<'r, DB>,
{
    fn decode(value: <DB as Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
        let s: &str = Decode::<DB>::decode(value)?;
        let app_id = s.parse().map_err(|error| sqlx::Error::Decode(Box::new(error)))?;
        Ok(app_id)
    }
}

/// Delivery platform of a submit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("platform must be one of ios, android")]
pub struct PlatformError;

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            _ => Err(PlatformError),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_accepts_bundle_id_shapes() {
        for raw in ["com.acme.app", "io.phnx.Prototype", "a.b", "org.example.app-2_beta"] {
            assert!(AppId::new(raw).is_ok(), "{raw} should be accepted");
        }
    }

    #[test]
    fn app_id_rejects_invalid_shapes() {
        assert_eq!(AppId::new("").unwrap_err(), AppIdError::Empty);
        assert_eq!(AppId::new("noseparator").unwrap_err(), AppIdError::MissingDot);
        assert_eq!(
            AppId::new("com.acme app").unwrap_err(),
            AppIdError::InvalidCharacter
        );
        assert_eq!(
            AppId::new("com.acme/app").unwrap_err(),
            AppIdError::InvalidCharacter
        );
    }

    #[test]
    fn platform_parses_known_values_only() {
        assert_eq!("ios".parse::<Platform>().unwrap(), Platform::Ios);
        assert_eq!("android".parse::<Platform>().unwrap(), Platform::Android);
        assert!("web".parse::<Platform>().is_err());
        assert!("IOS".parse::<Platform>().is_err());
    }
}
