// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-tenant APNs delivery over HTTP/2.
//!
//! One long-lived client per tenant, constructed lazily and evicted on
//! credential writes. Provider authentication uses an ES256 JWT that is
//! reissued once it is 40 minutes old (APNs requires tokens between 20 and
//! 60 minutes of age).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use nudgetypes::{identifiers::AppId, report::SendReport, request::DispatchRequest};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, Semaphore};

use super::{PushError, TokenOutcome};
use crate::store::IosConfig;

/// Tokens handed to one provider invocation.
pub const APNS_CHUNK_SIZE: usize = 1000;

/// Default message lifetime when the submit payload carries no TTL.
const DEFAULT_TTL_SECONDS: u64 = 3600;

const JWT_MAX_AGE_SECONDS: u64 = 40 * 60;

const PRODUCTION_HOST: &str = "https://api.push.apple.com";
const SANDBOX_HOST: &str = "https://api.sandbox.push.apple.com";

const PUSH_TYPE_ALERT: &str = "alert";
const PUSH_TYPE_BACKGROUND: &str = "background";

/// Rejections that mark the device token as permanently undeliverable.
const INVALID_TOKEN_REASONS: [&str; 3] =
    ["BadDeviceToken", "Unregistered", "DeviceTokenNotForTopic"];

#[derive(Debug, Serialize)]
struct ApnsClaims {
    iss: String,
    iat: usize,
}

#[derive(Debug, Clone)]
struct ProviderJwt {
    jwt: String,
    issued_at: u64,
}

#[derive(Debug, Deserialize)]
struct ApnsErrorBody {
    reason: Option<String>,
}

/// The per-tenant cache of APNs clients.
#[derive(Debug)]
pub struct ApnsPool {
    clients: DashMap<AppId, Arc<ApnsClient>>,
    max_in_flight: usize,
}

impl ApnsPool {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_in_flight,
        }
    }

    /// Send to every token of the request, constructing the tenant's client
    /// on first use. Two concurrent first-uses yield a single client.
    pub async fn send(
        &self,
        app_id: &AppId,
        config: &IosConfig,
        request: &DispatchRequest,
    ) -> Result<SendReport, PushError> {
        let client = self.client(app_id, config)?;
        client.send(request).await
    }

    fn client(&self, app_id: &AppId, config: &IosConfig) -> Result<Arc<ApnsClient>, PushError> {
        let entry = self
            .clients
            .entry(app_id.clone())
            .or_try_insert_with(|| {
                ApnsClient::build(app_id.clone(), config, self.max_in_flight).map(Arc::new)
            })?;
        Ok(entry.value().clone())
    }

    /// Evict a tenant's client, draining its in-flight sends first.
    /// Returns `false` when no client was cached.
    pub async fn invalidate(&self, app_id: &AppId) -> bool {
        match self.clients.remove(app_id) {
            Some((_, client)) => {
                client.drain().await;
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let tenants: Vec<AppId> = self.clients.iter().map(|e| e.key().clone()).collect();
        for tenant in tenants {
            self.invalidate(&tenant).await;
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of sends currently holding an in-flight permit, summed over
    /// all tenants. Sampled by the server's metrics sweeper.
    pub fn in_flight(&self) -> usize {
        self.clients
            .iter()
            .map(|entry| {
                let client = entry.value();
                client
                    .max_in_flight
                    .saturating_sub(client.in_flight.available_permits())
            })
            .sum()
    }
}

struct ApnsClient {
    app_id: AppId,
    http: reqwest::Client,
    host: &'static str,
    key_id: String,
    team_id: String,
    encoding_key: EncodingKey,
    token: Mutex<Option<ProviderJwt>>,
    in_flight: Semaphore,
    max_in_flight: usize,
}

impl std::fmt::Debug for ApnsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApnsClient")
            .field("app_id", &self.app_id)
            .field("host", &self.host)
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

impl ApnsClient {
    fn build(app_id: AppId, config: &IosConfig, max_in_flight: usize) -> Result<Self, PushError> {
        let encoding_key = EncodingKey::from_ec_pem(config.private_key.as_bytes())
            .map_err(|e| PushError::InvalidConfiguration(format!("unusable APNs key: {e}")))?;
        let http = reqwest::Client::builder()
            .http2_prior_knowledge()
            .build()
            .map_err(|e| PushError::Network(e.to_string()))?;
        Ok(Self {
            app_id,
            http,
            host: if config.production {
                PRODUCTION_HOST
            } else {
                SANDBOX_HOST
            },
            key_id: config.key_id.clone(),
            team_id: config.team_id.clone(),
            encoding_key,
            token: Mutex::new(None),
            in_flight: Semaphore::new(max_in_flight),
            max_in_flight,
        })
    }

    /// Return the cached provider JWT, reissuing it once it is 40 minutes
    /// old.
    async fn provider_jwt(&self) -> Result<String, PushError> {
        let mut token_option = self.token.lock().await;

        let now = Utc::now().timestamp() as u64;
        if let Some(token) = token_option.as_ref() {
            if now < token.issued_at + JWT_MAX_AGE_SECONDS {
                return Ok(token.jwt.clone());
            }
        }

        let claims = ApnsClaims {
            iss: self.team_id.clone(),
            iat: now as usize,
        };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let jwt = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| PushError::JwtCreation(e.to_string()))?;

        *token_option = Some(ProviderJwt {
            jwt: jwt.clone(),
            issued_at: now,
        });
        Ok(jwt)
    }

    async fn send(&self, request: &DispatchRequest) -> Result<SendReport, PushError> {
        let message = ApnsMessage::build(request, self.app_id.as_str(), Utc::now());
        let mut report = SendReport::with_requested(request.tokens.len());

        for chunk in request.tokens.chunks(APNS_CHUNK_SIZE) {
            let jwt = self.provider_jwt().await?;
            let outcomes =
                join_all(chunk.iter().map(|token| self.send_one(token, &jwt, &message))).await;
            for outcome in outcomes {
                match outcome {
                    TokenOutcome::Sent => report.sent += 1,
                    TokenOutcome::Failed { token, invalid } => {
                        report.failed += 1;
                        if invalid {
                            report.invalid_tokens.push(token);
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    async fn send_one(&self, token: &str, jwt: &str, message: &ApnsMessage) -> TokenOutcome {
        // A closed semaphore means the client was evicted mid-send; the
        // token counts as failed, not invalid.
        let Ok(_permit) = self.in_flight.acquire().await else {
            return TokenOutcome::failed(token, false);
        };

        let url = format!("{}/3/device/{}", self.host, token);
        let response = self
            .http
            .post(&url)
            .header("authorization", format!("bearer {jwt}"))
            .header("apns-topic", &message.topic)
            .header("apns-push-type", &message.push_type)
            .header("apns-priority", message.priority)
            .header("apns-expiration", message.expiration.to_string())
            .json(&message.payload)
            .send()
            .await;

        match response {
            Ok(res) if res.status() == StatusCode::OK => TokenOutcome::Sent,
            Ok(res) => {
                let status = res.status();
                let reason = res
                    .json::<ApnsErrorBody>()
                    .await
                    .ok()
                    .and_then(|body| body.reason);
                tracing::debug!(app_id = %self.app_id, %status, ?reason, "APNs rejected token");
                TokenOutcome::failed(token, is_invalid_token_response(status, reason.as_deref()))
            }
            Err(e) => {
                tracing::warn!(app_id = %self.app_id, error = %e, "APNs exchange failed");
                TokenOutcome::failed(token, false)
            }
        }
    }

    /// Wait for in-flight sends to finish, then refuse new ones.
    async fn drain(&self) {
        if let Ok(permits) = self.in_flight.acquire_many(self.max_in_flight as u32).await {
            permits.forget();
        }
        self.in_flight.close();
    }
}

/// A fully resolved notification: the headers and body shared by every
/// token of one submit.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApnsMessage {
    topic: String,
    push_type: String,
    priority: &'static str,
    expiration: i64,
    payload: Value,
}

impl ApnsMessage {
    fn build(request: &DispatchRequest, default_topic: &str, now: DateTime<Utc>) -> Self {
        let overrides = &request.apns;
        let alert = request.notification.as_ref();

        let push_type = match &overrides.push_type {
            Some(push_type) => push_type.clone(),
            None if overrides.content_available && alert.is_none() => {
                PUSH_TYPE_BACKGROUND.to_owned()
            }
            None => PUSH_TYPE_ALERT.to_owned(),
        };
        let priority = if push_type == PUSH_TYPE_BACKGROUND {
            "5"
        } else {
            "10"
        };

        let ttl = request.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
        let expiration = now.timestamp() + ttl as i64;

        let mut aps = Map::new();
        if let Some(notification) = alert {
            let mut body = Map::new();
            if let Some(title) = &notification.title {
                body.insert("title".into(), json!(title));
            }
            if let Some(text) = &notification.body {
                body.insert("body".into(), json!(text));
            }
            aps.insert("alert".into(), Value::Object(body));
        }
        match (&overrides.sound, alert) {
            (Some(sound), _) => {
                aps.insert("sound".into(), json!(sound));
            }
            (None, Some(_)) => {
                aps.insert("sound".into(), json!("default"));
            }
            (None, None) => {}
        }
        if let Some(badge) = overrides.badge {
            aps.insert("badge".into(), json!(badge));
        }
        if let Some(category) = &overrides.category {
            aps.insert("category".into(), json!(category));
        }
        if let Some(thread_id) = &overrides.thread_id {
            aps.insert("thread-id".into(), json!(thread_id));
        }
        if overrides.mutable_content {
            aps.insert("mutable-content".into(), json!(1));
        }
        if overrides.content_available {
            aps.insert("content-available".into(), json!(1));
        }

        // Custom data lives at the payload root, next to "aps".
        let mut payload = Map::new();
        for (key, value) in &request.data {
            payload.insert(key.clone(), json!(value));
        }
        payload.insert("aps".into(), Value::Object(aps));

        Self {
            topic: overrides
                .topic
                .clone()
                .unwrap_or_else(|| default_topic.to_owned()),
            push_type,
            priority,
            expiration,
            payload: Value::Object(payload),
        }
    }
}

fn is_invalid_token_response(status: StatusCode, reason: Option<&str>) -> bool {
    status == StatusCode::GONE
        || reason.is_some_and(|reason| INVALID_TOKEN_REASONS.contains(&reason))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use nudgetypes::identifiers::Platform;
    use serde_json::json;

    use super::*;

    fn request(payload: Value) -> DispatchRequest {
        DispatchRequest::parse(&payload).unwrap()
    }

    fn base_payload() -> Value {
        json!({
            "appId": "com.acme.app",
            "platform": "ios",
            "tokens": ["t1"],
            "notification": {"title": "Hi", "body": "there"},
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn alert_message_defaults() {
        let request = request(base_payload());
        assert_eq!(request.platform, Platform::Ios);
        let message = ApnsMessage::build(&request, "com.acme.app", now());

        assert_eq!(message.topic, "com.acme.app");
        assert_eq!(message.push_type, "alert");
        assert_eq!(message.priority, "10");
        assert_eq!(message.expiration, now().timestamp() + 3600);
        assert_eq!(
            message.payload["aps"]["alert"],
            json!({"title": "Hi", "body": "there"})
        );
        assert_eq!(message.payload["aps"]["sound"], json!("default"));
    }

    #[test]
    fn background_when_content_available_without_alert() {
        let mut payload = base_payload();
        payload.as_object_mut().unwrap().remove("notification");
        payload["data"] = json!({"k": "v"});
        payload["apns"] = json!({"contentAvailable": true});

        let message = ApnsMessage::build(&request(payload), "com.acme.app", now());
        assert_eq!(message.push_type, "background");
        assert_eq!(message.priority, "5");
        assert_eq!(message.payload["aps"]["content-available"], json!(1));
        // No alert, no explicit sound: sound stays unset.
        assert!(message.payload["aps"].get("sound").is_none());
        // Data rides at the payload root.
        assert_eq!(message.payload["k"], json!("v"));
    }

    #[test]
    fn explicit_push_type_wins_over_derivation() {
        let mut payload = base_payload();
        payload["apns"] = json!({"pushType": "voip", "contentAvailable": true});
        let message = ApnsMessage::build(&request(payload), "com.acme.app", now());
        assert_eq!(message.push_type, "voip");
        assert_eq!(message.priority, "10");
    }

    #[test]
    fn overrides_are_copied_into_aps() {
        let mut payload = base_payload();
        payload["apns"] = json!({
            "topic": "com.acme.voip",
            "sound": "chime.caf",
            "badge": 7,
            "category": "MSG",
            "threadId": "inbox",
            "mutableContent": true,
        });
        let message = ApnsMessage::build(&request(payload), "com.acme.app", now());
        assert_eq!(message.topic, "com.acme.voip");
        let aps = &message.payload["aps"];
        assert_eq!(aps["sound"], json!("chime.caf"));
        assert_eq!(aps["badge"], json!(7));
        assert_eq!(aps["category"], json!("MSG"));
        assert_eq!(aps["thread-id"], json!("inbox"));
        assert_eq!(aps["mutable-content"], json!(1));
    }

    #[test]
    fn supplied_ttl_overrides_the_default_expiry() {
        let mut payload = base_payload();
        payload["ttlSeconds"] = json!(86400);
        let message = ApnsMessage::build(&request(payload), "com.acme.app", now());
        assert_eq!(message.expiration, now().timestamp() + 86400);
    }

    #[test]
    fn classifies_unrecoverable_rejections() {
        assert!(is_invalid_token_response(StatusCode::GONE, None));
        for reason in INVALID_TOKEN_REASONS {
            assert!(is_invalid_token_response(StatusCode::BAD_REQUEST, Some(reason)));
        }
        assert!(!is_invalid_token_response(
            StatusCode::BAD_REQUEST,
            Some("PayloadTooLarge")
        ));
        assert!(!is_invalid_token_response(StatusCode::INTERNAL_SERVER_ERROR, None));
    }

    #[test]
    fn chunking_matches_the_batch_contract() {
        for (tokens, chunks) in [(1000usize, 1usize), (1001, 2), (2500, 3)] {
            let tokens: Vec<String> = (0..tokens).map(|i| format!("t{i}")).collect();
            assert_eq!(tokens.chunks(APNS_CHUNK_SIZE).count(), chunks);
        }
    }
}
