//! Import engine - reconciles normalized spreadsheet rows against the database
//!
//! One uploaded workbook is processed fully in memory, row by row, in file
//! order. Row failures never abort the batch: each row contributes exactly one
//! message to the outcome report and earlier rows' writes stay durable.
//!
//! Reconciliation is keyed by natural keys, not ids:
//! - employees upsert by DNI (account username = DNI)
//! - work details upsert by the one-to-one profile link, profile must pre-exist
//! - payslips are insert-only, duplicates on (profile, concept, period) skipped

use chrono::NaiveDate;
use hex::encode as hex_encode;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::rows::{self, EmployeeRow, PayslipRow, WorkDetailsRow};
use crate::sheet;

/// Batch-fatal failures: the request is rejected and zero rows are processed.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("No se ha enviado ningún archivo.")]
    MissingFile,
    #[error("El archivo debe ser un Excel (.xlsx).")]
    WrongExtension,
    #[error("Error al abrir el archivo: {0}")]
    Workbook(String),
    #[error("El archivo Excel no contiene hojas.")]
    EmptyWorkbook,
    #[error("Faltan columnas obligatorias en el Excel: {0}")]
    MissingColumns(String),
}

/// The three spreadsheet shapes this service ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Employees,
    WorkDetails,
    Payslips,
}

impl ImportKind {
    pub fn required_columns(&self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            ImportKind::Employees => sheet::EMPLOYEE_COLUMNS,
            ImportKind::WorkDetails => sheet::WORK_DETAIL_COLUMNS,
            ImportKind::Payslips => sheet::PAYSLIP_COLUMNS,
        }
    }

    pub fn optional_columns(&self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            ImportKind::Employees => sheet::EMPLOYEE_OPTIONAL_COLUMNS,
            _ => &[],
        }
    }

    /// Audit action tag recorded once per batch.
    pub fn audit_action(&self) -> &'static str {
        match self {
            ImportKind::Employees => "CARGA DE USUARIOS",
            ImportKind::WorkDetails => "CARGA DE DETALLE LABORAL",
            ImportKind::Payslips => "CARGA DE BOLETAS",
        }
    }
}

/// Per-request outcome accumulator: one message per processed or skipped row,
/// in row order, plus running counters.
#[derive(Debug, Default)]
pub struct ImportReport {
    messages: Vec<String>,
    pub created_count: u32,
    pub updated_count: u32,
    pub skipped_count: u32,
}

impl ImportReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&mut self, message: String) {
        self.created_count += 1;
        self.messages.push(message);
    }

    pub fn updated(&mut self, message: String) {
        self.updated_count += 1;
        self.messages.push(message);
    }

    pub fn skipped(&mut self, message: String) {
        self.skipped_count += 1;
        self.messages.push(message);
    }

    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Created(msg) => self.created(msg),
            RowOutcome::Updated(msg) => self.updated(msg),
            RowOutcome::Skipped(msg) => self.skipped(msg),
        }
    }

    /// Count headlines (non-zero counters only) followed by every row message.
    pub fn summary_messages(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.messages.len() + 3);
        if self.created_count > 0 {
            out.push(format!("Se crearon {} registros.", self.created_count));
        }
        if self.updated_count > 0 {
            out.push(format!("Se actualizaron {} registros.", self.updated_count));
        }
        if self.skipped_count > 0 {
            out.push(format!("Se omitieron {} filas.", self.skipped_count));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Newline-joined form written as the single audit entry for the batch.
    pub fn audit_description(&self) -> String {
        self.summary_messages().join("\n")
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RowOutcome {
    Created(String),
    Updated(String),
    Skipped(String),
}

/// Classifies an employee row from the account lookup alone: an existing
/// username (the DNI) means update, otherwise create.
fn employee_outcome(row_idx: usize, dni: &str, account_exists: bool) -> RowOutcome {
    if account_exists {
        RowOutcome::Updated(format!("Fila {}: Usuario con DNI {} actualizado.", row_idx, dni))
    } else {
        RowOutcome::Created(format!("Fila {}: Usuario con DNI {} creado.", row_idx, dni))
    }
}

/// Classifies a work-details row: no profile skips the row, an existing
/// one-to-one record is replaced, otherwise a new one is created.
fn work_details_outcome(
    row_idx: usize,
    dni: &str,
    profile_found: bool,
    details_exist: bool,
) -> RowOutcome {
    if !profile_found {
        return RowOutcome::Skipped(format!(
            "Fila {}: Usuario con DNI {} no existe. Se saltó la fila.",
            row_idx, dni
        ));
    }
    if details_exist {
        RowOutcome::Updated(format!(
            "Fila {}: Detalle laboral para DNI {} actualizado.",
            row_idx, dni
        ))
    } else {
        RowOutcome::Created(format!(
            "Fila {}: Detalle laboral para DNI {} creado.",
            row_idx, dni
        ))
    }
}

/// Classifies a payslip row: no profile skips, a line already present on the
/// (profile, concept, period) key skips as a duplicate, otherwise insert.
fn payslip_outcome(
    row_idx: usize,
    dni: &str,
    issue_date: NaiveDate,
    profile_found: bool,
    duplicate_exists: bool,
) -> RowOutcome {
    if !profile_found {
        return RowOutcome::Skipped(format!(
            "Fila {}: Usuario con DNI {} no existe. Se saltó la fila.",
            row_idx, dni
        ));
    }
    if duplicate_exists {
        return RowOutcome::Skipped(format!(
            "Fila {}: Boleta duplicada para DNI {} en periodo {}. Se saltó la fila.",
            row_idx,
            dni,
            issue_date.format("%m/%Y")
        ));
    }
    RowOutcome::Created(format!("Fila {}: Boleta para DNI {} creada.", row_idx, dni))
}

/// Drives one upload end to end: load workbook, resolve headers (fail fast),
/// then normalize + reconcile each data row, collecting outcomes.
pub async fn run_import(pool: &PgPool, kind: ImportKind, bytes: &[u8]) -> Result<ImportReport, ImportError> {
    let range = sheet::load_first_sheet(bytes)?;
    let headers = sheet::header_row(&range);

    let map = sheet::resolve_headers(&headers, kind.required_columns(), kind.optional_columns())
        .map_err(|missing| ImportError::MissingColumns(missing.join(", ")))?;

    let mut report = ImportReport::new();

    for (idx, row) in range.rows().enumerate().skip(1) {
        // Header is worksheet row 1, so the first data row reports as "Fila 2".
        let row_idx = idx + 1;

        let outcome = match kind {
            ImportKind::Employees => match rows::normalize_employee(row_idx, row, &map) {
                Ok(rec) => apply_employee(pool, row_idx, &rec).await,
                Err(msg) => Ok(RowOutcome::Skipped(msg)),
            },
            ImportKind::WorkDetails => match rows::normalize_work_details(row_idx, row, &map) {
                Ok(rec) => apply_work_details(pool, row_idx, &rec).await,
                Err(msg) => Ok(RowOutcome::Skipped(msg)),
            },
            ImportKind::Payslips => match rows::normalize_payslip(row_idx, row, &map) {
                Ok(rec) => apply_payslip(pool, row_idx, &rec).await,
                Err(msg) => Ok(RowOutcome::Skipped(msg)),
            },
        };

        match outcome {
            Ok(o) => report.record(o),
            // A persistence failure only loses the failing row.
            Err(e) => report.skipped(format!("Fila {}: Error al procesar la fila: {}", row_idx, e)),
        }
    }

    Ok(report)
}

/// Initial credential for accounts created by bulk import: digest of the DNI.
/// Kept for compatibility with the legacy loader; see DESIGN.md for the
/// hardening note.
fn initial_credential(dni: &str) -> String {
    hex_encode(Sha256::digest(dni.as_bytes()))
}

/// Upsert of account + profile keyed by DNI. Full attribute replace on update,
/// except `role`, which bulk import always forces to 'user'.
async fn apply_employee(pool: &PgPool, row_idx: usize, rec: &EmployeeRow) -> Result<RowOutcome, sqlx::Error> {
    let existing: Option<(Uuid,)> = sqlx::query_as("SELECT user_id FROM users WHERE username = $1")
        .bind(&rec.dni)
        .fetch_optional(pool)
        .await?;

    let outcome = employee_outcome(row_idx, &rec.dni, existing.is_some());

    let user_id = match existing {
        Some((id,)) => {
            sqlx::query(
                "UPDATE users SET first_name = $2, last_name = $3, email = COALESCE($4, email) WHERE user_id = $1",
            )
            .bind(id)
            .bind(&rec.first_name)
            .bind(&rec.last_name)
            .bind(&rec.email)
            .execute(pool)
            .await?;
            id
        }
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO users (user_id, username, password_hash, first_name, last_name, email)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id)
            .bind(&rec.dni)
            .bind(initial_credential(&rec.dni))
            .bind(&rec.first_name)
            .bind(&rec.last_name)
            .bind(&rec.email)
            .execute(pool)
            .await?;
            id
        }
    };

    let profile: Option<(Uuid,)> = sqlx::query_as("SELECT profile_id FROM profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    match profile {
        Some((profile_id,)) => {
            sqlx::query(
                r#"
                UPDATE profiles SET
                    dni = $2, role = 'user', position = $3, description = $4,
                    description_sp = $5, start_date = $6, end_date = $7,
                    resigned_date = $8, resigned = $9, regimen = $10, category = $11,
                    condition = $12, identification_code = $13, establishment = $14,
                    updated_at = now()
                WHERE profile_id = $1
                "#,
            )
            .bind(profile_id)
            .bind(&rec.dni)
            .bind(&rec.position)
            .bind(&rec.description)
            .bind(&rec.description_sp)
            .bind(rec.start_date)
            .bind(rec.end_date)
            .bind(rec.resigned_date)
            .bind(rec.resigned)
            .bind(&rec.regimen)
            .bind(&rec.category)
            .bind(&rec.condition)
            .bind(&rec.identification_code)
            .bind(&rec.establishment)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO profiles (
                    profile_id, user_id, dni, role, position, description, description_sp,
                    start_date, end_date, resigned_date, resigned, regimen, category,
                    condition, identification_code, establishment
                )
                VALUES ($1, $2, $3, 'user', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&rec.dni)
            .bind(&rec.position)
            .bind(&rec.description)
            .bind(&rec.description_sp)
            .bind(rec.start_date)
            .bind(rec.end_date)
            .bind(rec.resigned_date)
            .bind(rec.resigned)
            .bind(&rec.regimen)
            .bind(&rec.category)
            .bind(&rec.condition)
            .bind(&rec.identification_code)
            .bind(&rec.establishment)
            .execute(pool)
            .await?;
        }
    }

    Ok(outcome)
}

/// Full replace of the nine counters, keyed one-to-one on the profile.
/// Never creates profiles: a missing DNI skips the row.
async fn apply_work_details(pool: &PgPool, row_idx: usize, rec: &WorkDetailsRow) -> Result<RowOutcome, sqlx::Error> {
    let profile: Option<(Uuid,)> = sqlx::query_as("SELECT profile_id FROM profiles WHERE dni = $1")
        .bind(&rec.dni)
        .fetch_optional(pool)
        .await?;

    let Some((profile_id,)) = profile else {
        return Ok(work_details_outcome(row_idx, &rec.dni, false, false));
    };

    let existing: Option<(Uuid,)> =
        sqlx::query_as("SELECT work_detail_id FROM work_details WHERE profile_id = $1")
            .bind(profile_id)
            .fetch_optional(pool)
            .await?;

    let outcome = work_details_outcome(row_idx, &rec.dni, true, existing.is_some());

    match existing {
        Some((work_detail_id,)) => {
            sqlx::query(
                r#"
                UPDATE work_details SET
                    worked_days = $2, non_worked_days = $3, worked_hours = $4,
                    discount_academic_hours = $5, discount_lateness = $6,
                    personal_leave_hours = $7, sunday_discount = $8,
                    vacation_days = $9, vacation_hours = $10, updated_at = now()
                WHERE work_detail_id = $1
                "#,
            )
            .bind(work_detail_id)
            .bind(rec.worked_days)
            .bind(rec.non_worked_days)
            .bind(rec.worked_hours)
            .bind(rec.discount_academic_hours)
            .bind(rec.discount_lateness)
            .bind(rec.personal_leave_hours)
            .bind(rec.sunday_discount)
            .bind(rec.vacation_days)
            .bind(rec.vacation_hours)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO work_details (
                    work_detail_id, profile_id, worked_days, non_worked_days, worked_hours,
                    discount_academic_hours, discount_lateness, personal_leave_hours,
                    sunday_discount, vacation_days, vacation_hours
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(profile_id)
            .bind(rec.worked_days)
            .bind(rec.non_worked_days)
            .bind(rec.worked_hours)
            .bind(rec.discount_academic_hours)
            .bind(rec.discount_lateness)
            .bind(rec.personal_leave_hours)
            .bind(rec.sunday_discount)
            .bind(rec.vacation_days)
            .bind(rec.vacation_hours)
            .execute(pool)
            .await?;
        }
    }

    Ok(outcome)
}

/// Insert-only: an existing line with the same (profile, concept, period) is
/// reported as a duplicate and skipped, never overwritten.
async fn apply_payslip(pool: &PgPool, row_idx: usize, rec: &PayslipRow) -> Result<RowOutcome, sqlx::Error> {
    let profile: Option<(Uuid,)> = sqlx::query_as("SELECT profile_id FROM profiles WHERE dni = $1")
        .bind(&rec.dni)
        .fetch_optional(pool)
        .await?;

    let Some((profile_id,)) = profile else {
        return Ok(payslip_outcome(row_idx, &rec.dni, rec.issue_date, false, false));
    };

    // issue_date is always the first of the month, so equality covers
    // (year, month) of the natural key.
    let duplicate: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT payslip_id FROM payslips
        WHERE profile_id = $1 AND concept IS NOT DISTINCT FROM $2 AND issue_date = $3
        "#,
    )
    .bind(profile_id)
    .bind(&rec.concept)
    .bind(rec.issue_date)
    .fetch_optional(pool)
    .await?;

    let outcome = payslip_outcome(row_idx, &rec.dni, rec.issue_date, true, duplicate.is_some());
    if matches!(outcome, RowOutcome::Skipped(_)) {
        return Ok(outcome);
    }

    sqlx::query(
        r#"
        INSERT INTO payslips (
            payslip_id, profile_id, issue_date, concept, amount, data_source,
            payroll_type, data_type, position_order, view_status, pdf_file
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'unseen', '')
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(profile_id)
    .bind(rec.issue_date)
    .bind(&rec.concept)
    .bind(rec.amount)
    .bind(&rec.data_source)
    .bind(&rec.payroll_type)
    .bind(&rec.data_type)
    .bind(rec.position_order)
    .execute(pool)
    .await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_summary_headlines_and_order() {
        let mut report = ImportReport::new();
        report.created("Fila 2: Usuario con DNI 111 creado.".to_string());
        report.skipped("Fila 3: DNI no encontrado. Se saltó la fila.".to_string());
        report.updated("Fila 4: Usuario con DNI 111 actualizado.".to_string());

        let messages = report.summary_messages();
        assert_eq!(
            messages,
            vec![
                "Se crearon 1 registros.",
                "Se actualizaron 1 registros.",
                "Se omitieron 1 filas.",
                "Fila 2: Usuario con DNI 111 creado.",
                "Fila 3: DNI no encontrado. Se saltó la fila.",
                "Fila 4: Usuario con DNI 111 actualizado.",
            ]
        );
    }

    #[test]
    fn test_report_zero_counters_emit_no_headlines() {
        let report = ImportReport::new();
        assert!(report.summary_messages().is_empty());
        assert_eq!(report.audit_description(), "");
    }

    #[test]
    fn test_report_headlines_skip_zero_counts() {
        let mut report = ImportReport::new();
        report.skipped("Fila 2: Monto inválido ''. Se saltó la fila.".to_string());

        let messages = report.summary_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], "Se omitieron 1 filas.");
    }

    #[test]
    fn test_audit_description_joins_with_newlines() {
        let mut report = ImportReport::new();
        report.created("Fila 2: Boleta para DNI 111 creada.".to_string());
        report.skipped("Fila 3: Usuario con DNI 222 no existe. Se saltó la fila.".to_string());

        let text = report.audit_description();
        assert_eq!(text.lines().count(), 4);
        assert!(text.starts_with("Se crearon 1 registros.\n"));
    }

    #[test]
    fn test_import_error_messages() {
        assert_eq!(ImportError::MissingFile.to_string(), "No se ha enviado ningún archivo.");
        assert_eq!(ImportError::WrongExtension.to_string(), "El archivo debe ser un Excel (.xlsx).");
        assert_eq!(
            ImportError::MissingColumns("dni, concept".to_string()).to_string(),
            "Faltan columnas obligatorias en el Excel: dni, concept"
        );
    }

    #[test]
    fn test_kind_audit_actions() {
        assert_eq!(ImportKind::Employees.audit_action(), "CARGA DE USUARIOS");
        assert_eq!(ImportKind::WorkDetails.audit_action(), "CARGA DE DETALLE LABORAL");
        assert_eq!(ImportKind::Payslips.audit_action(), "CARGA DE BOLETAS");
    }

    #[test]
    fn test_kind_column_tables() {
        assert_eq!(ImportKind::WorkDetails.required_columns().len(), 10);
        assert_eq!(ImportKind::Payslips.required_columns().len(), 8);
        assert_eq!(ImportKind::Employees.required_columns().len(), 16);
        assert!(ImportKind::Payslips.optional_columns().is_empty());
        assert_eq!(ImportKind::Employees.optional_columns().len(), 1);
    }

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn test_employee_outcome_create_then_update() {
        assert_eq!(
            employee_outcome(2, "46251344", false),
            RowOutcome::Created("Fila 2: Usuario con DNI 46251344 creado.".to_string())
        );
        assert_eq!(
            employee_outcome(2, "46251344", true),
            RowOutcome::Updated("Fila 2: Usuario con DNI 46251344 actualizado.".to_string())
        );
    }

    #[test]
    fn test_employee_reimport_updates_every_row() {
        let dnis = ["46251344", "46251345", "46251346"];

        let mut first = ImportReport::new();
        for (i, dni) in dnis.iter().enumerate() {
            first.record(employee_outcome(i + 2, dni, false));
        }
        assert_eq!(first.created_count, 3);
        assert_eq!(first.updated_count, 0);

        // Same rows again: every DNI now has an account, nothing is created.
        let mut second = ImportReport::new();
        for (i, dni) in dnis.iter().enumerate() {
            second.record(employee_outcome(i + 2, dni, true));
        }
        assert_eq!(second.created_count, 0);
        assert_eq!(second.updated_count, 3);
        assert_eq!(second.skipped_count, 0);
    }

    #[test]
    fn test_work_details_outcome_requires_profile() {
        assert_eq!(
            work_details_outcome(2, "111", false, false),
            RowOutcome::Skipped("Fila 2: Usuario con DNI 111 no existe. Se saltó la fila.".to_string())
        );
        assert!(matches!(work_details_outcome(2, "111", true, false), RowOutcome::Created(_)));
        assert!(matches!(work_details_outcome(2, "111", true, true), RowOutcome::Updated(_)));
    }

    #[test]
    fn test_payslip_duplicate_rejected_not_overwritten() {
        let first = payslip_outcome(2, "46251344", date(2024, 3), true, false);
        assert!(matches!(first, RowOutcome::Created(_)));

        // The same (profile, concept, period) line on a later upload: the
        // existing record stays untouched and the row only reports a skip.
        let again = payslip_outcome(2, "46251344", date(2024, 3), true, true);
        assert_eq!(
            again,
            RowOutcome::Skipped(
                "Fila 2: Boleta duplicada para DNI 46251344 en periodo 03/2024. Se saltó la fila."
                    .to_string()
            )
        );
    }

    #[test]
    fn test_payslip_missing_profile_skips_before_duplicate_check() {
        assert_eq!(
            payslip_outcome(3, "222", date(2024, 1), false, false),
            RowOutcome::Skipped("Fila 3: Usuario con DNI 222 no existe. Se saltó la fila.".to_string())
        );
    }

    #[test]
    fn test_mixed_batch_counts_created_updated_skipped() {
        // Three-row batch: a new DNI, a known DNI, and a duplicate payslip.
        let mut report = ImportReport::new();
        report.record(payslip_outcome(2, "111", date(2024, 5), true, false));
        report.record(employee_outcome(3, "222", true));
        report.record(payslip_outcome(4, "111", date(2024, 5), true, true));

        assert_eq!(report.created_count, 1);
        assert_eq!(report.updated_count, 1);
        assert_eq!(report.skipped_count, 1);

        let messages = report.summary_messages();
        assert_eq!(messages[0], "Se crearon 1 registros.");
        assert_eq!(messages[3], "Fila 2: Boleta para DNI 111 creada.");
        assert_eq!(messages[4], "Fila 3: Usuario con DNI 222 actualizado.");
        assert!(messages[5].contains("Boleta duplicada"));
    }

    #[test]
    fn test_initial_credential_is_stable_digest() {
        let a = initial_credential("46251344");
        let b = initial_credential("46251344");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, initial_credential("46251345"));
    }
}
