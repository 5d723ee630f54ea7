// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-tenant FCM delivery over the HTTP v1 API.
//!
//! Clients are built from the tenant's inline service-account document and
//! cached until the credential changes. Requests authenticate with an
//! OAuth2 access token obtained by exchanging an RS256 service-account
//! assertion at Google's token endpoint; the access token is cached until
//! it expires.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use nudgetypes::{identifiers::AppId, report::SendReport, request::DispatchRequest};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use super::{PushError, TokenOutcome};
use crate::store::AndroidConfig;

/// Tokens handed to one multicast invocation.
pub const FCM_CHUNK_SIZE: usize = 500;

const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub project_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

#[derive(Debug, Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: usize,
    exp: usize,
}

#[derive(Debug, Deserialize)]
struct OauthSuccessResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OauthErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    // Seconds since UNIX_EPOCH.
    expires_at: u64,
}

impl AccessToken {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct FcmErrorBody {
    error: Option<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetail {
    status: Option<String>,
    message: Option<String>,
    #[serde(default)]
    details: Vec<Value>,
}

/// The per-tenant cache of FCM clients.
#[derive(Debug, Default)]
pub struct FcmPool {
    clients: DashMap<AppId, Arc<FcmClient>>,
}

impl FcmPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn send(
        &self,
        app_id: &AppId,
        config: &AndroidConfig,
        request: &DispatchRequest,
    ) -> Result<SendReport, PushError> {
        let client = self.client(app_id, config)?;
        client.send(request).await
    }

    fn client(&self, app_id: &AppId, config: &AndroidConfig) -> Result<Arc<FcmClient>, PushError> {
        let entry = self
            .clients
            .entry(app_id.clone())
            .or_try_insert_with(|| FcmClient::build(app_id.clone(), config).map(Arc::new))?;
        Ok(entry.value().clone())
    }

    /// Evict a tenant's client. Returns `false` when no client was cached.
    pub fn invalidate(&self, app_id: &AppId) -> bool {
        self.clients.remove(app_id).is_some()
    }

    pub fn shutdown(&self) {
        self.clients.clear();
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

struct FcmClient {
    app_id: AppId,
    http: reqwest::Client,
    service_account: ServiceAccount,
    encoding_key: EncodingKey,
    send_url: String,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for FcmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmClient")
            .field("app_id", &self.app_id)
            .field("send_url", &self.send_url)
            .field("client_email", &self.service_account.client_email)
            .finish_non_exhaustive()
    }
}

impl FcmClient {
    fn build(app_id: AppId, config: &AndroidConfig) -> Result<Self, PushError> {
        let service_account: ServiceAccount = serde_json::from_str(&config.service_account)
            .map_err(|e| {
                PushError::InvalidConfiguration(format!("unusable service account: {e}"))
            })?;
        let project_id = service_account.project_id.clone().ok_or_else(|| {
            PushError::InvalidConfiguration("service account lacks a project ID".into())
        })?;
        let encoding_key = EncodingKey::from_rsa_pem(service_account.private_key.as_bytes())
            .map_err(|e| {
                PushError::InvalidConfiguration(format!("unusable service-account key: {e}"))
            })?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PushError::Network(e.to_string()))?;

        Ok(Self {
            app_id,
            http,
            send_url: format!("https://fcm.googleapis.com/v1/projects/{project_id}/messages:send"),
            service_account,
            encoding_key,
            token: Mutex::new(None),
        })
    }

    /// Return the cached OAuth2 access token, exchanging a fresh assertion
    /// when it has expired.
    async fn access_token(&self) -> Result<String, PushError> {
        let mut token_option = self.token.lock().await;

        let now = Utc::now().timestamp() as u64;
        if let Some(token) = token_option.as_ref() {
            if !token.is_expired(now) {
                return Ok(token.token.clone());
            }
        }

        let claims = AssertionClaims {
            iss: self.service_account.client_email.clone(),
            scope: OAUTH_SCOPE.to_owned(),
            aud: self.service_account.token_uri.clone(),
            iat: now as usize,
            exp: (now + ASSERTION_LIFETIME_SECONDS) as usize,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| PushError::JwtCreation(e.to_string()))?;

        let response = self
            .http
            .post(&self.service_account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<OauthErrorResponse>(&body)
                .map(|e| {
                    format!("{} {}", e.error, e.error_description.unwrap_or_default())
                })
                .unwrap_or(body);
            return Err(PushError::OAuth(detail));
        }

        let token_response: OauthSuccessResponse =
            serde_json::from_str(&body).map_err(|e| PushError::OAuth(e.to_string()))?;

        let access_token = AccessToken {
            token: token_response.access_token,
            expires_at: now + token_response.expires_in,
        };
        *token_option = Some(access_token.clone());
        Ok(access_token.token)
    }

    async fn send(&self, request: &DispatchRequest) -> Result<SendReport, PushError> {
        let mut report = SendReport::with_requested(request.tokens.len());

        for chunk in request.tokens.chunks(FCM_CHUNK_SIZE) {
            let bearer = self.access_token().await?;
            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|token| self.send_one(token, &bearer, request)),
            )
            .await;
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

    async fn send_one(&self, token: &str, bearer: &str, request: &DispatchRequest) -> TokenOutcome {
        let message = build_message(token, request);
        let response = self
            .http
            .post(&self.send_url)
            .bearer_auth(bearer)
            .json(&message)
            .send()
            .await;

        match response {
            Ok(res) if res.status().is_success() => TokenOutcome::Sent,
            Ok(res) => {
                let status = res.status();
                let error = res
                    .json::<FcmErrorBody>()
                    .await
                    .ok()
                    .and_then(|body| body.error);
                tracing::debug!(app_id = %self.app_id, %status, ?error, "FCM rejected token");
                TokenOutcome::failed(token, is_invalid_token_response(status, error.as_ref()))
            }
            Err(e) => {
                tracing::warn!(app_id = %self.app_id, error = %e, "FCM exchange failed");
                TokenOutcome::failed(token, false)
            }
        }
    }
}

/// Assemble one HTTP v1 send body.
fn build_message(token: &str, request: &DispatchRequest) -> Value {
    let mut message = Map::new();
    message.insert("token".into(), json!(token));

    if let Some(notification) = &request.notification {
        let mut body = Map::new();
        if let Some(title) = &notification.title {
            body.insert("title".into(), json!(title));
        }
        if let Some(text) = &notification.body {
            body.insert("body".into(), json!(text));
        }
        message.insert("notification".into(), Value::Object(body));
    }

    if !request.data.is_empty() {
        message.insert("data".into(), json!(request.data));
    }

    let mut android = Map::new();
    if let Some(ttl) = request.fcm.ttl_seconds.or(request.ttl_seconds) {
        android.insert("ttl".into(), json!(format!("{ttl}s")));
    }
    if let Some(priority) = request.fcm.priority {
        android.insert("priority".into(), json!(priority.as_wire_str()));
    }
    if let Some(collapse_key) = &request.fcm.collapse_key {
        android.insert("collapseKey".into(), json!(collapse_key));
    }
    if !android.is_empty() {
        message.insert("android".into(), Value::Object(android));
    }

    json!({ "message": Value::Object(message) })
}

/// A token is invalid iff the registration is gone or the v1 error
/// identifies the registration token itself as malformed.
fn is_invalid_token_response(status: StatusCode, error: Option<&FcmErrorDetail>) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    let Some(error) = error else {
        return false;
    };
    match error.status.as_deref() {
        Some("UNREGISTERED") | Some("NOT_FOUND") => true,
        Some("INVALID_ARGUMENT") => {
            error
                .message
                .as_deref()
                .is_some_and(|message| message.to_lowercase().contains("registration token"))
                || error.details.iter().any(|detail| {
                    detail.get("errorCode").and_then(Value::as_str) == Some("UNREGISTERED")
                })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(payload: Value) -> DispatchRequest {
        DispatchRequest::parse(&payload).unwrap()
    }

    fn base_payload() -> Value {
        json!({
            "appId": "com.acme.app",
            "platform": "android",
            "tokens": ["t1"],
            "notification": {"title": "Hi", "body": "there"},
        })
    }

    #[test]
    fn message_includes_notification_and_omits_empty_blocks() {
        let message = build_message("t1", &request(base_payload()));
        assert_eq!(message["message"]["token"], json!("t1"));
        assert_eq!(
            message["message"]["notification"],
            json!({"title": "Hi", "body": "there"})
        );
        assert!(message["message"].get("data").is_none());
        assert!(message["message"].get("android").is_none());
    }

    #[test]
    fn data_only_message_omits_the_notification_block() {
        let mut payload = base_payload();
        payload.as_object_mut().unwrap().remove("notification");
        payload["data"] = json!({"k": "v"});
        let message = build_message("t1", &request(payload));
        assert!(message["message"].get("notification").is_none());
        assert_eq!(message["message"]["data"], json!({"k": "v"}));
    }

    #[test]
    fn android_block_carries_ttl_priority_and_collapse_key() {
        let mut payload = base_payload();
        payload["fcm"] = json!({"ttlSeconds": 120, "priority": "high", "collapseKey": "c1"});
        let message = build_message("t1", &request(payload));
        let android = &message["message"]["android"];
        assert_eq!(android["ttl"], json!("120s"));
        assert_eq!(android["priority"], json!("HIGH"));
        assert_eq!(android["collapseKey"], json!("c1"));
    }

    #[test]
    fn global_ttl_is_used_when_the_fcm_block_has_none() {
        let mut payload = base_payload();
        payload["ttlSeconds"] = json!(60);
        let message = build_message("t1", &request(payload.clone()));
        assert_eq!(message["message"]["android"]["ttl"], json!("60s"));

        // The provider-specific value wins.
        payload["fcm"] = json!({"ttlSeconds": 30});
        let message = build_message("t1", &request(payload));
        assert_eq!(message["message"]["android"]["ttl"], json!("30s"));
    }

    #[test]
    fn classifies_unregistered_tokens_as_invalid() {
        assert!(is_invalid_token_response(StatusCode::NOT_FOUND, None));

        let unregistered = FcmErrorDetail {
            status: Some("UNREGISTERED".into()),
            message: None,
            details: vec![],
        };
        assert!(is_invalid_token_response(
            StatusCode::BAD_REQUEST,
            Some(&unregistered)
        ));

        let bad_token = FcmErrorDetail {
            status: Some("INVALID_ARGUMENT".into()),
            message: Some("The registration token is not a valid FCM registration token".into()),
            details: vec![],
        };
        assert!(is_invalid_token_response(
            StatusCode::BAD_REQUEST,
            Some(&bad_token)
        ));

        let bad_token_detail = FcmErrorDetail {
            status: Some("INVALID_ARGUMENT".into()),
            message: None,
            details: vec![json!({"errorCode": "UNREGISTERED"})],
        };
        assert!(is_invalid_token_response(
            StatusCode::BAD_REQUEST,
            Some(&bad_token_detail)
        ));
    }

    #[test]
    fn other_failures_are_not_token_invalidations() {
        let quota = FcmErrorDetail {
            status: Some("RESOURCE_EXHAUSTED".into()),
            message: Some("Quota exceeded".into()),
            details: vec![],
        };
        assert!(!is_invalid_token_response(
            StatusCode::TOO_MANY_REQUESTS,
            Some(&quota)
        ));

        let bad_payload = FcmErrorDetail {
            status: Some("INVALID_ARGUMENT".into()),
            message: Some("Invalid JSON payload".into()),
            details: vec![],
        };
        assert!(!is_invalid_token_response(
            StatusCode::BAD_REQUEST,
            Some(&bad_payload)
        ));
    }

    #[test]
    fn access_token_expiry() {
        let token = AccessToken {
            token: "t".into(),
            expires_at: 1000,
        };
        assert!(!token.is_expired(999));
        assert!(token.is_expired(1000));
        assert!(token.is_expired(1001));
    }

    #[test]
    fn chunking_matches_the_multicast_contract() {
        for (tokens, chunks) in [(500usize, 1usize), (501, 2), (1250, 3)] {
            let tokens: Vec<String> = (0..tokens).map(|i| format!("t{i}")).collect();
            assert_eq!(tokens.chunks(FCM_CHUNK_SIZE).count(), chunks);
        }
    }
}
