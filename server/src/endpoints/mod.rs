// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use actix_web::{HttpResponse, Responder};
use serde_json::json;

pub mod admin;
mod notify;

pub use notify::notify;

/// Data-plane endpoints
pub const ENDPOINT_NOTIFY: &str = "/v1/notify";
pub const ENDPOINT_HEALTH: &str = "/health";

/// Liveness probe; bypasses admission entirely.
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "ok": true }))
}
