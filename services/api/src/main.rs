//! Payroll API Service - spreadsheet import and payslip lifecycle
//!
//! Endpoints:
//! - GET  /health - Health check
//! - POST /profiles/upload-users - Bulk employee import (.xlsx, admin only)
//! - POST /profiles/upload-work-details - Bulk work-details import (admin only)
//! - POST /payslips/upload-payslips - Bulk payslip import (admin only)
//! - POST /payslips/{id}/view-status - Move a payslip's disclosure state
//!
//! Each import runs synchronously within the request: the whole workbook is
//! processed in file order and the caller gets one message per row plus
//! summary counters. Row writes are durable individually; there is no
//! whole-batch rollback.

mod audit;
mod import;
mod response;
mod rows;
mod sheet;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use import::{ImportError, ImportKind};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

// ============================================================================
// Caller identity (auth itself lives elsewhere; we only resolve tokens)
// ============================================================================

struct Actor {
    profile_id: Uuid,
    role: String,
}

impl Actor {
    fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Resolves the bearer token against the session store. 401 when the token is
/// absent or unknown; privilege checks are the caller's business.
async fn authorize(pool: &PgPool, headers: &HeaderMap) -> Result<Actor, Response> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return Err(response::error(
            StatusCode::UNAUTHORIZED,
            "Token de autenticación ausente.",
        ));
    };

    let row: Option<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT p.profile_id, p.role
        FROM auth_tokens t
        JOIN profiles p ON p.profile_id = t.profile_id
        WHERE t.token = $1
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .map_err(|e| response::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;

    match row {
        Some((profile_id, role)) => Ok(Actor { profile_id, role }),
        None => Err(response::error(
            StatusCode::UNAUTHORIZED,
            "Token de autenticación inválido.",
        )),
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: "0.1.0",
    })
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Pulls the `file` field out of the multipart body, if one was sent.
async fn read_upload(multipart: &mut Multipart) -> Result<Option<Upload>, Response> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| response::error(StatusCode::BAD_REQUEST, &e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| response::error(StatusCode::BAD_REQUEST, &e.to_string()))?
            .to_vec();
        return Ok(Some(Upload { filename, bytes }));
    }
    Ok(None)
}

/// Shared orchestration for the three spreadsheet imports: admin check, file
/// checks, batch run, one audit record, success envelope with row messages.
async fn handle_upload(
    state: Arc<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
    kind: ImportKind,
) -> Response {
    let actor = match authorize(&state.pool, &headers).await {
        Ok(actor) => actor,
        Err(resp) => return resp,
    };
    if !actor.is_admin() {
        return response::error(
            StatusCode::FORBIDDEN,
            "No tiene permisos para realizar esta acción.",
        );
    }

    let upload = match read_upload(&mut multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            return response::error(StatusCode::BAD_REQUEST, &ImportError::MissingFile.to_string())
        }
        Err(resp) => return resp,
    };

    if !upload.filename.ends_with(".xlsx") {
        return response::error(
            StatusCode::BAD_REQUEST,
            &ImportError::WrongExtension.to_string(),
        );
    }

    match import::run_import(&state.pool, kind, &upload.bytes).await {
        Ok(report) => {
            audit::record(
                &state.pool,
                Some(actor.profile_id),
                kind.audit_action(),
                &report.audit_description(),
            )
            .await;

            response::success(
                "Procesamiento finalizado.",
                serde_json::json!({
                    "messages": report.summary_messages(),
                    "created_count": report.created_count,
                    "updated_count": report.updated_count,
                    "skipped_count": report.skipped_count,
                }),
            )
        }
        Err(e) => {
            let errors = match &e {
                ImportError::MissingColumns(joined) => {
                    joined.split(", ").map(str::to_string).collect()
                }
                _ => vec![],
            };
            response::error_with(StatusCode::BAD_REQUEST, &e.to_string(), errors)
        }
    }
}

async fn upload_users_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    handle_upload(state, headers, multipart, ImportKind::Employees).await
}

async fn upload_work_details_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    handle_upload(state, headers, multipart, ImportKind::WorkDetails).await
}

async fn upload_payslips_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    handle_upload(state, headers, multipart, ImportKind::Payslips).await
}

// ============================================================================
// Payslip view status
// ============================================================================

#[derive(Deserialize)]
struct ViewStatusRequest {
    status: String,
}

/// Disclosure lifecycle order: unseen -> generated -> seen -> downloaded.
fn view_status_rank(status: &str) -> Option<u8> {
    match status {
        "unseen" => Some(0),
        "generated" => Some(1),
        "seen" => Some(2),
        "downloaded" => Some(3),
        _ => None,
    }
}

/// Marks how far a payslip has travelled through disclosure. Forward-only:
/// a downloaded payslip can never go back to unseen. Owner or admin only.
async fn view_status_handler(
    State(state): State<Arc<AppState>>,
    Path(payslip_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ViewStatusRequest>,
) -> Response {
    let actor = match authorize(&state.pool, &headers).await {
        Ok(actor) => actor,
        Err(resp) => return resp,
    };

    let Some(new_rank) = view_status_rank(&body.status).filter(|&r| r > 0) else {
        return response::error(
            StatusCode::BAD_REQUEST,
            &format!("Estado de visualización inválido: '{}'.", body.status),
        );
    };

    let row: Result<Option<(Uuid, String)>, _> =
        sqlx::query_as("SELECT profile_id, view_status FROM payslips WHERE payslip_id = $1")
            .bind(payslip_id)
            .fetch_optional(&state.pool)
            .await;

    let (owner_id, current) = match row {
        Ok(Some(r)) => r,
        Ok(None) => return response::error(StatusCode::NOT_FOUND, "Boleta no encontrada."),
        Err(e) => return response::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    if owner_id != actor.profile_id && !actor.is_admin() {
        return response::error(
            StatusCode::FORBIDDEN,
            "No tiene permisos para realizar esta acción.",
        );
    }

    let current_rank = view_status_rank(&current).unwrap_or(0);
    if new_rank < current_rank {
        return response::error(
            StatusCode::BAD_REQUEST,
            &format!("Transición de estado inválida: {} -> {}.", current, body.status),
        );
    }

    let updated = sqlx::query(
        "UPDATE payslips SET view_status = $2, updated_at = now() WHERE payslip_id = $1",
    )
    .bind(payslip_id)
    .bind(&body.status)
    .execute(&state.pool)
    .await;

    if let Err(e) = updated {
        return response::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    audit::record(
        &state.pool,
        Some(actor.profile_id),
        "VISUALIZACION DE BOLETA",
        &format!("Boleta {} marcada como {}.", payslip_id, body.status),
    )
    .await;

    response::success(
        "Estado de visualización actualizado.",
        serde_json::json!({
            "payslip_id": payslip_id,
            "view_status": body.status,
        }),
    )
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    println!("=== Payroll API ===");
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    println!("Database connected");

    let state = Arc::new(AppState { pool });

    // CORS for the admin frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/profiles/upload-users", post(upload_users_handler))
        .route("/profiles/upload-work-details", post(upload_work_details_handler))
        .route("/payslips/upload-payslips", post(upload_payslips_handler))
        .route("/payslips/:payslip_id/view-status", post(view_status_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state);

    println!("API listening on http://{}", bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  POST /profiles/upload-users");
    println!("  POST /profiles/upload-work-details");
    println!("  POST /payslips/upload-payslips");
    println!("  POST /payslips/:payslip_id/view-status");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_status_rank_order() {
        assert!(view_status_rank("unseen") < view_status_rank("generated"));
        assert!(view_status_rank("generated") < view_status_rank("seen"));
        assert!(view_status_rank("seen") < view_status_rank("downloaded"));
        assert_eq!(view_status_rank("archived"), None);
    }
}
