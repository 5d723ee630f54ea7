// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The JSON admin API, mounted under the provisioned base path at
//! `<base>/api`. Writes map one-to-one to the credential-store operations;
//! credential writes publish the provider-pool invalidation before the
//! response is sent.

use actix_web::{HttpRequest, HttpResponse, http::header, web};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use nudgebackend::store::{
    AdminUser, AndroidCredentialUpload, IosCredentialUpload, verify_password,
};
use nudgetypes::identifiers::{AppId, AppIdError};
use serde::Deserialize;
use serde_json::json;

use crate::{AppState, error::GatewayError};

pub fn configure(config: &mut web::ServiceConfig) {
    config
        .route("/apps", web::get().to(list_apps))
        .route("/apps", web::post().to(create_app))
        .route("/apps/{app_id}", web::get().to(get_app))
        .route("/apps/{app_id}", web::patch().to(update_app))
        .route("/apps/{app_id}/rotate-secret", web::post().to(rotate_secret))
        .route("/apps/{app_id}/ios-config", web::put().to(put_ios_config))
        .route("/apps/{app_id}/ios-config", web::delete().to(delete_ios_config))
        .route(
            "/apps/{app_id}/android-config",
            web::put().to(put_android_config),
        )
        .route(
            "/apps/{app_id}/android-config",
            web::delete().to(delete_android_config),
        )
        .route("/password", web::post().to(change_password));
}

/// HTTP Basic authentication against the admin user table.
async fn authenticate(req: &HttpRequest, state: &AppState) -> Result<AdminUser, GatewayError> {
    let credentials = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| BASE64_STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .ok_or_else(|| GatewayError::unauthorized("Authentication required"))?;
    let (username, password) = credentials
        .split_once(':')
        .ok_or_else(|| GatewayError::unauthorized("Authentication required"))?;

    state
        .store
        .get_admin_by_username(username)
        .await?
        .filter(|admin| verify_password(&admin.password_hash, password))
        .ok_or_else(|| GatewayError::unauthorized("Invalid credentials"))
}

fn parse_app_id(raw: String) -> Result<AppId, GatewayError> {
    raw.parse()
        .map_err(|e: AppIdError| GatewayError::bad_request(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAppRequest {
    app_id: AppId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UpdateAppRequest {
    name: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IosConfigRequest {
    team_id: String,
    key_id: String,
    private_key: String,
    #[serde(default)]
    production: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AndroidConfigRequest {
    service_account: String,
}

#[derive(Debug, Deserialize)]
struct PasswordRequest {
    password: String,
}

async fn list_apps(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let apps = state.store.list_apps().await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "apps": apps })))
}

async fn create_app(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateAppRequest>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let body = body.into_inner();
    let (app, api_secret) = state.store.create_app(&body.app_id, &body.name).await?;
    // The secret is surfaced exactly once, at creation.
    Ok(HttpResponse::Created().json(json!({ "ok": true, "app": app, "apiSecret": api_secret })))
}

async fn get_app(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let app = state
        .store
        .get_app(&path.into_inner())
        .await?
        .ok_or_else(|| GatewayError::NotFound("Unknown app".into()))?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "app": app })))
}

async fn update_app(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<UpdateAppRequest>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let body = body.into_inner();
    let app = state
        .store
        .update_app(&path.into_inner(), body.name.as_deref(), body.enabled)
        .await?
        .ok_or_else(|| GatewayError::NotFound("Unknown app".into()))?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "app": app })))
}

async fn rotate_secret(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let api_secret = state
        .store
        .rotate_secret(&path.into_inner())
        .await?
        .ok_or_else(|| GatewayError::NotFound("Unknown app".into()))?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "apiSecret": api_secret })))
}

async fn put_ios_config(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<IosConfigRequest>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let app_id = parse_app_id(path.into_inner())?;
    let body = body.into_inner();
    state
        .store
        .upsert_ios_config(
            &app_id,
            IosCredentialUpload {
                team_id: body.team_id,
                key_id: body.key_id,
                private_key: body.private_key,
                production: body.production,
            },
        )
        .await?;
    // Subsequent sends must observe the new credential.
    state.pools.invalidate_ios(&app_id).await;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn delete_ios_config(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let app_id = parse_app_id(path.into_inner())?;
    let deleted = state.store.delete_ios_config(app_id.as_str()).await?;
    if !deleted {
        return Err(GatewayError::NotFound("Unknown app".into()));
    }
    state.pools.invalidate_ios(&app_id).await;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn put_android_config(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AndroidConfigRequest>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let app_id = parse_app_id(path.into_inner())?;
    state
        .store
        .upsert_android_config(
            &app_id,
            AndroidCredentialUpload {
                service_account: body.into_inner().service_account,
            },
        )
        .await?;
    state.pools.invalidate_android(&app_id).await;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn delete_android_config(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, GatewayError> {
    authenticate(&req, &state).await?;
    let app_id = parse_app_id(path.into_inner())?;
    let deleted = state.store.delete_android_config(app_id.as_str()).await?;
    if !deleted {
        return Err(GatewayError::NotFound("Unknown app".into()));
    }
    state.pools.invalidate_android(&app_id).await;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn change_password(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PasswordRequest>,
) -> Result<HttpResponse, GatewayError> {
    let admin = authenticate(&req, &state).await?;
    let password = body.into_inner().password;
    if password.len() < 8 {
        return Err(GatewayError::bad_request(
            "Password must be at least 8 characters",
        ));
    }
    state
        .store
        .update_admin_password(&admin.username, &password)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}
