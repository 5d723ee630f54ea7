// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The gateway's error taxonomy. Every admission and dispatch failure is a
//! typed error carrying a status and a short message; all of them render as
//! the single JSON envelope `{ok:false, error:{message, details?}}`.

use actix_web::{HttpResponse, ResponseError, http::StatusCode, http::header};
use nudgebackend::{errors::StorageError, push::PushError, store::StoreError};
use nudgetypes::request::ValidationError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_seconds: u64 },
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }
}

impl From<ValidationError> for GatewayError {
    fn from(e: ValidationError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<StorageError> for GatewayError {
    fn from(e: StorageError) -> Self {
        Self::Internal(e.into())
    }
}

impl From<PushError> for GatewayError {
    fn from(e: PushError) -> Self {
        Self::Internal(e.into())
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateApp => Self::bad_request("App already exists"),
            StoreError::UnknownApp => Self::NotFound("Unknown app".into()),
            StoreError::InvalidCredential(message) => Self::bad_request(message),
            StoreError::InvalidBasePath(message) => Self::bad_request(message),
            StoreError::Storage(storage) => storage.into(),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internals are logged, never leaked; the envelope stays generic.
        if let GatewayError::Internal(error) = self {
            tracing::error!(error = %format!("{error:#}"), "Unhandled gateway error");
        }

        let mut error_body = json!({ "message": self.to_string() });
        if let GatewayError::BadRequest {
            details: Some(details),
            ..
        } = self
        {
            error_body["details"] = details.clone();
        }

        let mut builder = HttpResponse::build(self.status_code());
        if let GatewayError::RateLimited {
            retry_after_seconds,
        } = self
        {
            builder.insert_header((header::RETRY_AFTER, retry_after_seconds.to_string()));
        }
        builder.json(json!({ "ok": false, "error": error_body }))
    }
}
