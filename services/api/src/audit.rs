//! Best-effort audit sink.
//!
//! Audit writes must never fail the operation they describe. A failed insert
//! is reported on stderr and otherwise ignored.

use sqlx::PgPool;
use uuid::Uuid;

pub async fn record(pool: &PgPool, profile_id: Option<Uuid>, action: &str, description: &str) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs (audit_log_id, profile_id, action, description)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(profile_id)
    .bind(action)
    .bind(description)
    .execute(pool)
    .await;

    if let Err(e) = result {
        eprintln!("Warning: audit write failed for action '{}': {}", action, e);
    }
}
