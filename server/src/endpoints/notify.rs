// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use actix_web::{HttpRequest, HttpResponse, web};
use futures_util::StreamExt;
use nudgetypes::{identifiers::Platform, request::DispatchRequest};
use serde_json::json;

use crate::{AppState, admission, error::GatewayError};

/// `POST /v1/notify`: admit, validate, look the tenant up, deliver.
#[tracing::instrument(name = "Dispatch notification", skip_all)]
pub async fn notify(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    // HTTPS, allowlist and rate limit run before the body is pulled from
    // the socket.
    let rate_headers = admission::preflight(&req, &state)?;

    // The raw bytes are kept verbatim; the HMAC stage verifies over exactly
    // what was received, not over a re-encoding.
    let body = read_body(payload, state.settings.body_limit).await?;
    let (payload, authenticated_app) = admission::authenticate(&req, &body, &state).await?;

    let request = DispatchRequest::parse(&payload)?;
    if let Some(authenticated) = &authenticated_app {
        if authenticated != request.app_id.as_str() {
            return Err(GatewayError::bad_request(
                "appId does not match the authenticated app",
            ));
        }
    }

    let config = state
        .store
        .get_app_config(request.app_id.as_str())
        .await?
        .ok_or_else(|| GatewayError::NotFound("Unknown app".into()))?;

    // Sends run on a detached task so they complete, and invalid tokens are
    // still learned, even when the caller disconnects mid-request.
    let pools = state.pools.clone();
    let dispatch = request.clone();
    let report = match request.platform {
        Platform::Ios => {
            let ios = config.ios.clone().ok_or_else(|| {
                GatewayError::bad_request("iOS is not configured for this app")
            })?;
            tokio::spawn(
                async move { pools.apns.send(&dispatch.app_id, &ios, &dispatch).await },
            )
            .await
            .map_err(anyhow::Error::from)??
        }
        Platform::Android => {
            let android = config.android.clone().ok_or_else(|| {
                GatewayError::bad_request("Android is not configured for this app")
            })?;
            tokio::spawn(
                async move { pools.fcm.send(&dispatch.app_id, &android, &dispatch).await },
            )
            .await
            .map_err(anyhow::Error::from)??
        }
    };

    tracing::info!(
        app_id = %request.app_id,
        platform = %request.platform,
        requested = report.requested,
        sent = report.sent,
        failed = report.failed,
        invalid = report.invalid_tokens.len(),
        "Dispatched notification"
    );

    let mut results = serde_json::Map::new();
    results.insert(
        request.platform.to_string(),
        serde_json::to_value(&report).map_err(anyhow::Error::from)?,
    );

    let mut response = HttpResponse::Ok();
    if let Some(headers) = rate_headers {
        response
            .insert_header(("X-RateLimit-Limit", headers.limit.to_string()))
            .insert_header(("X-RateLimit-Remaining", headers.remaining.to_string()))
            .insert_header(("X-RateLimit-Reset", headers.reset_epoch.to_string()));
    }
    Ok(response.json(json!({
        "ok": true,
        "appId": request.app_id,
        "results": results,
    })))
}

/// Collect the request body up to the configured cap.
async fn read_body(mut payload: web::Payload, limit: usize) -> Result<web::Bytes, GatewayError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk =
            chunk.map_err(|_| GatewayError::bad_request("Invalid request body"))?;
        if body.len() + chunk.len() > limit {
            return Err(GatewayError::bad_request(
                "Request body exceeds the configured limit",
            ));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}
