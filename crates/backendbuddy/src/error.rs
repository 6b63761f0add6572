// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds surfaced across the admin API and the reverse proxy.
///
/// Supervisors and the admission controller never raise across their public
/// API; they return tagged results. Only the transport layer translates a
/// failure kind into an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppError {
    ConfigurationAbsent,
    CommandInvalid,
    TargetRefused,
    TargetTimeout,
    NotFound,
    BadRequest,
    Internal,
}

impl AppError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::ConfigurationAbsent => StatusCode::SERVICE_UNAVAILABLE,
            Self::CommandInvalid | Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::TargetRefused => StatusCode::BAD_GATEWAY,
            Self::TargetTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationAbsent => "CONFIGURATION_ABSENT",
            Self::CommandInvalid => "COMMAND_INVALID",
            Self::TargetRefused => "TARGET_REFUSED",
            Self::TargetTimeout => "TARGET_TIMEOUT",
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn with_message(self, message: impl Into<String>) -> ErrorResponse {
        ErrorResponse { error: message.into(), code: self.as_str().to_owned(), target: None }
    }

    /// Like `with_message`, plus the `target` URL the proxy was forwarding
    /// to (spec §7 Scenario E: target-down/timeout bodies carry the target
    /// alongside the fixed error text).
    pub fn with_target(self, message: impl Into<String>, target: impl Into<String>) -> ErrorResponse {
        ErrorResponse { error: message.into(), code: self.as_str().to_owned(), target: Some(target.into()) }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.http_status(), Json(self.with_message(self.as_str()))).into_response()
    }
}

/// JSON error envelope returned by operator-facing API handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(match self.code.as_str() {
                "CONFIGURATION_ABSENT" => 503,
                "COMMAND_INVALID" | "BAD_REQUEST" => 400,
                "TARGET_REFUSED" => 502,
                "TARGET_TIMEOUT" => 504,
                "NOT_FOUND" => 404,
                _ => 500,
            })
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Envelope for unhandled panics/exceptions escaping a handler (spec §7 "Unhandled").
#[derive(Debug, Clone, Serialize)]
pub struct UnhandledError {
    pub detail: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl IntoResponse for UnhandledError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_target_serializes_error_and_target_as_sibling_fields() {
        let body = AppError::TargetRefused
            .with_target("Target application not responding", "http://127.0.0.1:8000/");
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["error"], "Target application not responding");
        assert_eq!(json["target"], "http://127.0.0.1:8000/");
        assert_eq!(json["code"], "TARGET_REFUSED");
    }

    #[test]
    fn with_message_omits_target_entirely() {
        let body = AppError::NotFound.with_message("no such session");
        let json = serde_json::to_value(&body).expect("serialize");
        assert!(json.get("target").is_none());
    }
}
