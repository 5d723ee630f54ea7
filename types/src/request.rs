// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Normalization and bounds-checking of the submit payload.
//!
//! Parsing works on a raw [`serde_json::Value`] rather than a derived struct
//! so that shape errors ("not an object", "tokens is not an array") stay
//! distinguishable from bound violations, and so that the raw request bytes
//! the signature was computed over never need to be re-encoded.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use crate::identifiers::{AppId, AppIdError, Platform};

pub const MAX_TOKENS: usize = 500;
pub const MAX_TOKEN_LENGTH: usize = 4096;
pub const MAX_TITLE_LENGTH: usize = 256;
pub const MAX_BODY_LENGTH: usize = 2048;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("appId is required")]
    MissingAppId,
    #[error("invalid appId: {0}")]
    InvalidAppId(#[from] AppIdError),
    #[error("broadcast is not supported")]
    BroadcastUnsupported,
    #[error("platform must be one of ios, android")]
    InvalidPlatform,
    #[error("tokens is required")]
    MissingTokens,
    #[error("tokens must be a non-empty array of strings")]
    MalformedTokens,
    #[error("tokens cannot exceed {MAX_TOKENS}")]
    TooManyTokens,
    #[error("token exceeds {MAX_TOKEN_LENGTH} characters")]
    TokenTooLong,
    #[error("notification.title cannot exceed {MAX_TITLE_LENGTH} characters")]
    TitleTooLong,
    #[error("notification.body cannot exceed {MAX_BODY_LENGTH} characters")]
    BodyTooLong,
    #[error("data must be a flat map of scalar values")]
    MalformedData,
    #[error("ttlSeconds must be a non-negative integer")]
    InvalidTtl,
    #[error("fcm.priority must be one of high, normal")]
    InvalidFcmPriority,
    #[error("either notification or data is required")]
    EmptyMessage,
}

/// Alert content shared by both providers. Title and body arrive trimmed and
/// are dropped entirely when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub title: Option<String>,
    pub body: Option<String>,
}

impl Notification {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none()
    }
}

/// APNs-specific overrides of the submit payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApnsOverrides {
    pub topic: Option<String>,
    pub push_type: Option<String>,
    pub sound: Option<String>,
    pub badge: Option<i64>,
    pub category: Option<String>,
    pub thread_id: Option<String>,
    pub mutable_content: bool,
    pub content_available: bool,
}

/// FCM-specific overrides of the submit payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FcmOverrides {
    pub ttl_seconds: Option<u64>,
    pub priority: Option<FcmPriority>,
    pub collapse_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcmPriority {
    High,
    Normal,
}

impl FcmPriority {
    /// Wire value of the HTTP v1 `AndroidMessagePriority` enum.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            FcmPriority::High => "HIGH",
            FcmPriority::Normal => "NORMAL",
        }
    }
}

/// The normalized submit request handed to the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub app_id: AppId,
    pub platform: Platform,
    /// Deduplicated, first occurrence wins. Length in `1..=MAX_TOKENS`.
    pub tokens: Vec<String>,
    pub notification: Option<Notification>,
    pub data: BTreeMap<String, String>,
    pub ttl_seconds: Option<u64>,
    pub apns: ApnsOverrides,
    pub fcm: FcmOverrides,
}

impl DispatchRequest {
    /// Validate and normalize a parsed submit payload.
    pub fn parse(payload: &Value) -> Result<Self, ValidationError> {
        let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;

        if object.get("broadcast").is_some_and(truthy) {
            return Err(ValidationError::BroadcastUnsupported);
        }

        let app_id = object
            .get("appId")
            .and_then(Value::as_str)
            .ok_or(ValidationError::MissingAppId)?;
        let app_id = AppId::new(app_id)?;

        let platform: Platform = object
            .get("platform")
            .and_then(Value::as_str)
            .ok_or(ValidationError::InvalidPlatform)?
            .parse()
            .map_err(|_| ValidationError::InvalidPlatform)?;

        let tokens = parse_tokens(object.get("tokens"))?;
        let notification = parse_notification(object.get("notification"))?;
        let data = parse_data(object.get("data"))?;

        if notification.is_none() && data.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        let ttl_seconds = parse_ttl(object.get("ttlSeconds"))?;
        let apns = parse_apns_overrides(object.get("apns"));
        let fcm = parse_fcm_overrides(object.get("fcm"))?;

        Ok(Self {
            app_id,
            platform,
            tokens,
            notification,
            data,
            ttl_seconds,
            apns,
            fcm,
        })
    }
}

fn parse_tokens(value: Option<&Value>) -> Result<Vec<String>, ValidationError> {
    let raw = value.ok_or(ValidationError::MissingTokens)?;
    let array = raw.as_array().ok_or(ValidationError::MalformedTokens)?;
    if array.is_empty() {
        return Err(ValidationError::MalformedTokens);
    }

    let mut seen = HashSet::new();
    let mut tokens = Vec::with_capacity(array.len());
    for entry in array {
        let token = entry.as_str().ok_or(ValidationError::MalformedTokens)?;
        if token.chars().count() > MAX_TOKEN_LENGTH {
            return Err(ValidationError::TokenTooLong);
        }
        if seen.insert(token) {
            tokens.push(token.to_owned());
        }
    }
    if tokens.len() > MAX_TOKENS {
        return Err(ValidationError::TooManyTokens);
    }
    Ok(tokens)
}

fn parse_notification(value: Option<&Value>) -> Result<Option<Notification>, ValidationError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let Some(object) = raw.as_object() else {
        return Ok(None);
    };

    let title = bounded_text(object.get("title"), MAX_TITLE_LENGTH, ValidationError::TitleTooLong)?;
    let body = bounded_text(object.get("body"), MAX_BODY_LENGTH, ValidationError::BodyTooLong)?;

    let notification = Notification { title, body };
    Ok((!notification.is_empty()).then_some(notification))
}

fn bounded_text(
    value: Option<&Value>,
    max_len: usize,
    overflow: ValidationError,
) -> Result<Option<String>, ValidationError> {
    let Some(text) = value.and_then(Value::as_str) else {
        return Ok(None);
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max_len {
        return Err(overflow);
    }
    Ok(Some(trimmed.to_owned()))
}

fn parse_data(value: Option<&Value>) -> Result<BTreeMap<String, String>, ValidationError> {
    let Some(raw) = value else {
        return Ok(BTreeMap::new());
    };
    let object = raw.as_object().ok_or(ValidationError::MalformedData)?;

    let mut data = BTreeMap::new();
    for (key, entry) in object {
        let coerced = match entry {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            // Nulls, arrays and nested objects are rejected rather than
            // silently stringified.
            _ => return Err(ValidationError::MalformedData),
        };
        data.insert(key.clone(), coerced);
    }
    Ok(data)
}

fn parse_ttl(value: Option<&Value>) -> Result<Option<u64>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => raw.as_u64().map(Some).ok_or(ValidationError::InvalidTtl),
    }
}

fn parse_apns_overrides(value: Option<&Value>) -> ApnsOverrides {
    let Some(object) = value.and_then(Value::as_object) else {
        return ApnsOverrides::default();
    };
    ApnsOverrides {
        topic: string_field(object.get("topic")),
        push_type: string_field(object.get("pushType")),
        sound: string_field(object.get("sound")),
        badge: object.get("badge").and_then(Value::as_i64),
        category: string_field(object.get("category")),
        thread_id: string_field(object.get("threadId")),
        mutable_content: object.get("mutableContent").is_some_and(truthy),
        content_available: object.get("contentAvailable").is_some_and(truthy),
    }
}

fn parse_fcm_overrides(value: Option<&Value>) -> Result<FcmOverrides, ValidationError> {
    let Some(object) = value.and_then(Value::as_object) else {
        return Ok(FcmOverrides::default());
    };
    let priority = match object.get("priority").and_then(Value::as_str) {
        None => None,
        Some("high") => Some(FcmPriority::High),
        Some("normal") => Some(FcmPriority::Normal),
        Some(_) => return Err(ValidationError::InvalidFcmPriority),
    };
    Ok(FcmOverrides {
        ttl_seconds: parse_ttl(object.get("ttlSeconds")).map_err(|_| ValidationError::InvalidTtl)?,
        priority,
        collapse_key: string_field(object.get("collapseKey")),
    })
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_owned)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0" && s != "false",
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn base_request() -> Value {
        json!({
            "appId": "com.acme.app",
            "platform": "ios",
            "tokens": ["t1", "t2"],
            "notification": {"title": "Hi", "body": "there"},
        })
    }

    #[test]
    fn parses_the_happy_path() {
        let request = DispatchRequest::parse(&base_request()).unwrap();
        assert_eq!(request.app_id.as_str(), "com.acme.app");
        assert_eq!(request.platform, Platform::Ios);
        assert_eq!(request.tokens, vec!["t1", "t2"]);
        let notification = request.notification.unwrap();
        assert_eq!(notification.title.as_deref(), Some("Hi"));
        assert_eq!(notification.body.as_deref(), Some("there"));
    }

    #[test]
    fn rejects_non_objects() {
        for payload in [json!(null), json!([1, 2]), json!("notify"), json!(42)] {
            assert_eq!(
                DispatchRequest::parse(&payload).unwrap_err(),
                ValidationError::NotAnObject
            );
        }
    }

    #[test]
    fn rejects_broadcast() {
        let mut payload = base_request();
        payload["broadcast"] = json!(true);
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::BroadcastUnsupported
        );
    }

    #[test]
    fn rejects_unknown_platforms() {
        let mut payload = base_request();
        payload["platform"] = json!("web");
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::InvalidPlatform
        );
        payload.as_object_mut().unwrap().remove("platform");
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::InvalidPlatform
        );
    }

    #[test]
    fn dedups_tokens_preserving_first_occurrence() {
        let mut payload = base_request();
        payload["tokens"] = json!(["b", "a", "b", "c", "a"]);
        let request = DispatchRequest::parse(&payload).unwrap();
        assert_eq!(request.tokens, vec!["b", "a", "c"]);
    }

    #[test]
    fn enforces_the_token_count_bound_after_dedup() {
        let mut payload = base_request();

        // 501 raw entries collapsing to 500 unique ones pass.
        let mut tokens: Vec<String> = (0..MAX_TOKENS).map(|i| format!("tok{i}")).collect();
        tokens.push("tok0".to_owned());
        payload["tokens"] = json!(tokens);
        let request = DispatchRequest::parse(&payload).unwrap();
        assert_eq!(request.tokens.len(), MAX_TOKENS);

        // 501 unique ones do not.
        let tokens: Vec<String> = (0..=MAX_TOKENS).map(|i| format!("tok{i}")).collect();
        payload["tokens"] = json!(tokens);
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::TooManyTokens
        );
    }

    #[test]
    fn enforces_the_token_length_bound() {
        let mut payload = base_request();
        payload["tokens"] = json!(["x".repeat(MAX_TOKEN_LENGTH)]);
        assert!(DispatchRequest::parse(&payload).is_ok());

        payload["tokens"] = json!(["x".repeat(MAX_TOKEN_LENGTH + 1)]);
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::TokenTooLong
        );
    }

    #[test]
    fn rejects_malformed_token_lists() {
        let mut payload = base_request();
        for tokens in [json!("t1"), json!([]), json!([1, 2]), json!([null])] {
            payload["tokens"] = tokens;
            assert_eq!(
                DispatchRequest::parse(&payload).unwrap_err(),
                ValidationError::MalformedTokens
            );
        }
        payload.as_object_mut().unwrap().remove("tokens");
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::MissingTokens
        );
    }

    #[test]
    fn trims_and_drops_empty_notification_text() {
        let mut payload = base_request();
        payload["notification"] = json!({"title": "  Hi  ", "body": "   "});
        let request = DispatchRequest::parse(&payload).unwrap();
        let notification = request.notification.unwrap();
        assert_eq!(notification.title.as_deref(), Some("Hi"));
        assert_eq!(notification.body, None);
    }

    #[test]
    fn enforces_title_and_body_bounds() {
        let mut payload = base_request();
        payload["notification"] = json!({"title": "x".repeat(MAX_TITLE_LENGTH + 1)});
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::TitleTooLong
        );
        payload["notification"] = json!({"body": "x".repeat(MAX_BODY_LENGTH + 1)});
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::BodyTooLong
        );
    }

    #[test]
    fn coerces_scalar_data_values_to_strings() {
        let mut payload = base_request();
        payload["data"] = json!({"count": 3, "flag": true, "label": "x"});
        let request = DispatchRequest::parse(&payload).unwrap();
        assert_eq!(request.data.get("count").unwrap(), "3");
        assert_eq!(request.data.get("flag").unwrap(), "true");
        assert_eq!(request.data.get("label").unwrap(), "x");
    }

    #[test]
    fn rejects_nested_or_null_data_values() {
        let mut payload = base_request();
        for data in [json!({"a": null}), json!({"a": {"b": 1}}), json!({"a": [1]}), json!([1])] {
            payload["data"] = data;
            assert_eq!(
                DispatchRequest::parse(&payload).unwrap_err(),
                ValidationError::MalformedData
            );
        }
    }

    #[test]
    fn requires_notification_or_data() {
        let mut payload = base_request();
        payload.as_object_mut().unwrap().remove("notification");
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::EmptyMessage
        );

        // Data alone is enough.
        payload["data"] = json!({"k": "v"});
        assert!(DispatchRequest::parse(&payload).is_ok());

        // A notification that trims away to nothing does not count.
        payload.as_object_mut().unwrap().remove("data");
        payload["notification"] = json!({"title": "  "});
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::EmptyMessage
        );
    }

    #[test]
    fn rejects_negative_or_fractional_ttl() {
        let mut payload = base_request();
        payload["ttlSeconds"] = json!(-1);
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::InvalidTtl
        );
        payload["ttlSeconds"] = json!(1.5);
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::InvalidTtl
        );
        payload["ttlSeconds"] = json!(0);
        assert_eq!(DispatchRequest::parse(&payload).unwrap().ttl_seconds, Some(0));
    }

    #[test]
    fn reads_provider_override_blocks() {
        let mut payload = base_request();
        payload["apns"] = json!({
            "topic": "com.acme.voip",
            "pushType": "voip",
            "badge": 4,
            "mutableContent": 1,
            "contentAvailable": true,
        });
        payload["fcm"] = json!({"ttlSeconds": 120, "priority": "high", "collapseKey": "c1"});

        let request = DispatchRequest::parse(&payload).unwrap();
        assert_eq!(request.apns.topic.as_deref(), Some("com.acme.voip"));
        assert_eq!(request.apns.push_type.as_deref(), Some("voip"));
        assert_eq!(request.apns.badge, Some(4));
        assert!(request.apns.mutable_content);
        assert!(request.apns.content_available);
        assert_eq!(request.fcm.ttl_seconds, Some(120));
        assert_eq!(request.fcm.priority, Some(FcmPriority::High));
        assert_eq!(request.fcm.collapse_key.as_deref(), Some("c1"));
    }

    #[test]
    fn rejects_unknown_fcm_priority() {
        let mut payload = base_request();
        payload["fcm"] = json!({"priority": "urgent"});
        assert_eq!(
            DispatchRequest::parse(&payload).unwrap_err(),
            ValidationError::InvalidFcmPriority
        );
    }
}
