// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The request-admission pipeline, composed in fixed order: HTTPS
//! enforcement, IP allowlist, rate limit, JSON body parse, API-key check,
//! HMAC verification with nonce consumption. The first failing stage
//! short-circuits with a typed error.
//!
//! The security headers of stage one are unconditional and therefore
//! applied as response middleware in [`crate::run`] rather than here.

use std::net::IpAddr;

use actix_web::HttpRequest;
use actix_web::http::header;
use chrono::{TimeZone, Utc};
use nudgebackend::signing;
use serde_json::Value;

use crate::{AppState, error::GatewayError};

pub mod rate_limit;

/// Upper bound on the `X-Nonce` header.
pub const MAX_NONCE_LENGTH: usize = 128;

/// Rate-limit headers for the response, present on the first admitted
/// request of a window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    pub reset_epoch: i64,
}

/// Stages that run before the request body is pulled from the socket.
pub fn preflight(
    req: &HttpRequest,
    state: &AppState,
) -> Result<Option<RateLimitHeaders>, GatewayError> {
    enforce_https(req, state)?;
    enforce_ip_allowlist(req, state)?;
    check_rate_limit(req, state)
}

/// Stages that run over the raw body bytes: JSON parse, API key, HMAC.
///
/// Returns the parsed payload and the app id resolved by the enabled auth
/// stages, if any.
pub async fn authenticate(
    req: &HttpRequest,
    body: &[u8],
    state: &AppState,
) -> Result<(Value, Option<String>), GatewayError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|_| GatewayError::bad_request("Invalid JSON"))?;

    let mut authenticated_app = None;
    // The API secret resolved by one stage is reused by the next.
    let mut resolved_secret: Option<String> = None;

    if state.settings.require_auth() {
        let (app_id, secret) = check_api_key(req, &payload, state).await?;
        authenticated_app = Some(app_id);
        resolved_secret = Some(secret);
    }

    if state.settings.require_hmac {
        let app_id = check_hmac(req, &payload, body, state, resolved_secret).await?;
        authenticated_app.get_or_insert(app_id);
    }

    Ok((payload, authenticated_app))
}

fn enforce_https(req: &HttpRequest, state: &AppState) -> Result<(), GatewayError> {
    if !state.settings.require_https {
        return Ok(());
    }
    // The transport itself is TLS when the server was bound with TLS.
    if req.app_config().secure() {
        return Ok(());
    }
    if state.settings.trust_proxy && forwarded_proto(req).as_deref() == Some("https") {
        return Ok(());
    }
    Err(GatewayError::Forbidden("HTTPS is required".into()))
}

/// First token of `X-Forwarded-Proto`, lower-cased.
fn forwarded_proto(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("x-forwarded-proto")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(|proto| proto.trim().to_ascii_lowercase())
}

fn enforce_ip_allowlist(req: &HttpRequest, state: &AppState) -> Result<(), GatewayError> {
    let Some(allowlist) = &state.allowlist else {
        return Ok(());
    };
    let allowed = client_ip(req, state.settings.trust_proxy)
        .is_some_and(|ip| allowlist.contains(&ip));
    if allowed {
        Ok(())
    } else {
        Err(GatewayError::Forbidden("IP address not allowed".into()))
    }
}

fn check_rate_limit(
    req: &HttpRequest,
    state: &AppState,
) -> Result<Option<RateLimitHeaders>, GatewayError> {
    let now = Utc::now();
    let key =
        client_ip(req, state.settings.trust_proxy).unwrap_or_else(|| "unknown".to_owned());
    let decision = state.rate_limiter.check(&key, now);
    if !decision.allowed {
        return Err(GatewayError::RateLimited {
            retry_after_seconds: decision.retry_after_seconds(now),
        });
    }
    Ok(decision.first_hit.then_some(RateLimitHeaders {
        limit: decision.limit,
        remaining: decision.remaining,
        reset_epoch: decision.reset_at.timestamp(),
    }))
}

async fn check_api_key(
    req: &HttpRequest,
    payload: &Value,
    state: &AppState,
) -> Result<(String, String), GatewayError> {
    let app_id = resolve_app_id(req, payload)
        .ok_or_else(|| GatewayError::bad_request("appId is required"))?;
    let provided = bearer_or_api_key(req)
        .ok_or_else(|| GatewayError::unauthorized("API key is required"))?;
    let secret = state
        .store
        .get_api_secret(&app_id)
        .await?
        .ok_or_else(|| GatewayError::unauthorized("Invalid API key"))?;
    if !signing::secrets_match(&secret, &provided) {
        return Err(GatewayError::unauthorized("Invalid API key"));
    }
    Ok((app_id, secret))
}

async fn check_hmac(
    req: &HttpRequest,
    payload: &Value,
    body: &[u8],
    state: &AppState,
    resolved_secret: Option<String>,
) -> Result<String, GatewayError> {
    let timestamp: i64 = required_header(req, "x-timestamp")
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| GatewayError::unauthorized("Missing or invalid X-Timestamp"))?;
    let nonce = required_header(req, "x-nonce")
        .filter(|nonce| nonce.chars().count() <= MAX_NONCE_LENGTH)
        .ok_or_else(|| GatewayError::unauthorized("Missing or invalid X-Nonce"))?;
    let signature = required_header(req, "x-signature")
        .ok_or_else(|| GatewayError::unauthorized("Missing X-Signature"))?;

    let now = Utc::now();
    let window_ms = state.settings.hmac_window_ms;
    if (now.timestamp_millis() - timestamp).abs() > window_ms {
        return Err(GatewayError::unauthorized(
            "Timestamp outside allowed window",
        ));
    }

    let app_id = resolve_app_id(req, payload)
        .ok_or_else(|| GatewayError::bad_request("appId is required"))?;
    let secret = match resolved_secret {
        Some(secret) => secret,
        None => state
            .store
            .get_api_secret(&app_id)
            .await?
            .ok_or_else(|| GatewayError::unauthorized("Unknown app"))?,
    };

    if !signing::verify(
        &secret,
        req.method().as_str(),
        req.path(),
        timestamp,
        &nonce,
        body,
        &signature,
    ) {
        return Err(GatewayError::unauthorized("Invalid signature"));
    }

    let expires_at = Utc
        .timestamp_millis_opt(timestamp.saturating_add(window_ms))
        .single()
        .ok_or_else(|| GatewayError::unauthorized("Missing or invalid X-Timestamp"))?;
    if !state.nonces.consume(&app_id, &nonce, now, expires_at).await? {
        return Err(GatewayError::unauthorized("Nonce already used"));
    }

    Ok(app_id)
}

/// The app id an auth stage verifies against: body `appId`, else `X-App-Id`.
fn resolve_app_id(req: &HttpRequest, payload: &Value) -> Option<String> {
    payload
        .get("appId")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| required_header(req, "x-app-id"))
}

fn required_header(req: &HttpRequest, name: &str) -> Option<String> {
    let value = req.headers().get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn bearer_or_api_key(req: &HttpRequest) -> Option<String> {
    if let Some(auth) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_owned());
            }
        }
    }
    required_header(req, "x-api-key")
}

/// Client address used for the allowlist and rate-limit keys.
/// IPv4-mapped IPv6 addresses collapse to their IPv4 form.
pub(crate) fn client_ip(req: &HttpRequest, trust_proxy: bool) -> Option<String> {
    if trust_proxy {
        if let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return Some(normalize_ip(first));
                }
            }
        }
    }
    req.peer_addr().map(|addr| normalize_ip(&addr.ip().to_string()))
}

pub(crate) fn normalize_ip(raw: &str) -> String {
    if let Ok(addr) = raw.parse::<IpAddr>() {
        if let IpAddr::V6(v6) = addr {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.to_string();
            }
        }
        return addr.to_string();
    }
    raw.to_owned()
}

#[cfg(test)]
mod tests {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn normalizes_ipv4_mapped_ipv6() {
        assert_eq!(normalize_ip("::ffff:10.0.0.1"), "10.0.0.1");
        assert_eq!(normalize_ip("10.0.0.1"), "10.0.0.1");
        assert_eq!(normalize_ip("2001:db8::1"), "2001:db8::1");
        assert_eq!(normalize_ip("not-an-ip"), "not-an-ip");
    }

    #[test]
    fn forwarded_proto_takes_the_first_token() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-Proto", "https, http"))
            .to_http_request();
        assert_eq!(forwarded_proto(&req).as_deref(), Some("https"));

        let req = TestRequest::default()
            .insert_header(("X-Forwarded-Proto", "HTTP"))
            .to_http_request();
        assert_eq!(forwarded_proto(&req).as_deref(), Some("http"));

        let req = TestRequest::default().to_http_request();
        assert_eq!(forwarded_proto(&req), None);
    }

    #[test]
    fn client_ip_prefers_forwarded_for_only_when_proxied() {
        let req = TestRequest::default()
            .peer_addr("[::ffff:192.0.2.7]:443".parse().unwrap())
            .insert_header(("X-Forwarded-For", "203.0.113.9, 10.0.0.1"))
            .to_http_request();

        assert_eq!(client_ip(&req, true).as_deref(), Some("203.0.113.9"));
        assert_eq!(client_ip(&req, false).as_deref(), Some("192.0.2.7"));
    }

    #[test]
    fn resolve_app_id_prefers_the_body() {
        let req = TestRequest::default()
            .insert_header(("X-App-Id", "com.header.app"))
            .to_http_request();
        let payload = serde_json::json!({"appId": "com.body.app"});
        assert_eq!(
            resolve_app_id(&req, &payload).as_deref(),
            Some("com.body.app")
        );
        assert_eq!(
            resolve_app_id(&req, &serde_json::json!({})).as_deref(),
            Some("com.header.app")
        );

        let bare = TestRequest::default().to_http_request();
        assert_eq!(resolve_app_id(&bare, &serde_json::json!({})), None);
    }

    #[test]
    fn bearer_or_api_key_accepts_both_carriers() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer s3cret"))
            .to_http_request();
        assert_eq!(bearer_or_api_key(&req).as_deref(), Some("s3cret"));

        let req = TestRequest::default()
            .insert_header(("X-Api-Key", "s3cret"))
            .to_http_request();
        assert_eq!(bearer_or_api_key(&req).as_deref(), Some("s3cret"));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic abc"))
            .to_http_request();
        assert_eq!(bearer_or_api_key(&req), None);
    }
}
