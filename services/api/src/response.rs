//! Uniform API envelope shared by every endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

const API_VERSION: &str = "v1.0.0";

#[derive(Serialize)]
struct Envelope {
    code: u16,
    status: &'static str,
    messages: Vec<String>,
    data: Option<Value>,
    meta: Meta,
}

#[derive(Serialize)]
struct Meta {
    version: &'static str,
    timestamp: String,
    errors: Vec<String>,
}

/// 200 envelope with a human message and a data payload.
pub fn success(message: &str, data: Value) -> Response {
    let body = Envelope {
        code: StatusCode::OK.as_u16(),
        status: "success",
        messages: vec![message.to_string()],
        data: Some(data),
        meta: Meta {
            version: API_VERSION,
            timestamp: Utc::now().to_rfc3339(),
            errors: vec![],
        },
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Error envelope with the given status and a single message.
pub fn error(code: StatusCode, message: &str) -> Response {
    error_with(code, message, vec![])
}

/// Error envelope carrying a structured error list alongside the message.
pub fn error_with(code: StatusCode, message: &str, errors: Vec<String>) -> Response {
    let body = Envelope {
        code: code.as_u16(),
        status: "error",
        messages: vec![message.to_string()],
        data: None,
        meta: Meta {
            version: API_VERSION,
            timestamp: Utc::now().to_rfc3339(),
            errors,
        },
    };
    (code, Json(body)).into_response()
}
