//! Row normalization - raw worksheet cells into typed import records
//!
//! Each import shape gets a fixed-field record built from the column map.
//! Failures here are row-local: the normalizer returns a human message for the
//! outcome report and the batch moves on to the next row.

use calamine::Data;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::sheet::ColumnMap;

/// Spanish month names as they appear in payslip period cells.
/// Matching is exact on the uppercased token; accented spellings do not match.
const SPANISH_MONTHS: &[(&str, u32)] = &[
    ("ENERO", 1),
    ("FEBRERO", 2),
    ("MARZO", 3),
    ("ABRIL", 4),
    ("MAYO", 5),
    ("JUNIO", 6),
    ("JULIO", 7),
    ("AGOSTO", 8),
    ("SEPTIEMBRE", 9),
    ("OCTUBRE", 10),
    ("NOVIEMBRE", 11),
    ("DICIEMBRE", 12),
];

/// One employee profile row, fully coerced.
#[derive(Debug, Clone)]
pub struct EmployeeRow {
    pub dni: String,
    pub last_name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub position: Option<String>,
    pub description: Option<String>,
    pub description_sp: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub resigned_date: Option<NaiveDate>,
    pub resigned: bool,
    pub regimen: Option<String>,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub identification_code: Option<String>,
    pub establishment: Option<String>,
}

/// One work-details row: DNI plus the nine counters.
#[derive(Debug, Clone)]
pub struct WorkDetailsRow {
    pub dni: String,
    pub worked_days: i32,
    pub non_worked_days: i32,
    pub worked_hours: i32,
    pub discount_academic_hours: i32,
    pub discount_lateness: i32,
    pub personal_leave_hours: i32,
    pub sunday_discount: i32,
    pub vacation_days: i32,
    pub vacation_hours: i32,
}

/// One payslip line row.
#[derive(Debug, Clone)]
pub struct PayslipRow {
    pub dni: String,
    pub concept: Option<String>,
    pub amount: Decimal,
    pub data_source: Option<String>,
    pub payroll_type: Option<String>,
    pub data_type: Option<String>,
    pub position_order: i32,
    pub issue_date: NaiveDate,
}

/// Stringifies a cell, trimmed; empty cells become None. Numeric cells with an
/// integral value render without a fractional part so DNIs survive intact.
pub fn cell_str(cell: Option<&Data>) -> Option<String> {
    let cell = cell?;
    let s = match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Empty | Data::Error(_) => String::new(),
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Text fields: stringify, uppercase, trim; empty -> None.
pub fn cell_upper(cell: Option<&Data>) -> Option<String> {
    cell_str(cell).map(|s| s.to_uppercase())
}

/// Dates: accept a native date cell or a "dd/mm/yyyy" string; anything else
/// quietly becomes None.
pub fn cell_date(cell: Option<&Data>) -> Option<NaiveDate> {
    match cell? {
        Data::DateTime(dt) => dt.as_datetime().map(|d| d.date()),
        Data::DateTimeIso(s) => NaiveDate::parse_from_str(&s[..s.len().min(10)], "%Y-%m-%d").ok(),
        Data::String(s) => NaiveDate::parse_from_str(s.trim(), "%d/%m/%Y").ok(),
        _ => None,
    }
}

/// The resigned flag is true for exactly 1, "1", a true cell, "TRUE" or "True".
pub fn cell_resigned(cell: Option<&Data>) -> bool {
    match cell {
        Some(Data::Bool(b)) => *b,
        Some(Data::Float(f)) => *f == 1.0,
        Some(Data::Int(i)) => *i == 1,
        Some(Data::String(s)) => matches!(s.trim(), "1" | "TRUE" | "True"),
        _ => false,
    }
}

/// Fixed-point amount; None means the cell did not parse as a decimal.
pub fn cell_decimal(cell: Option<&Data>) -> Option<Decimal> {
    let value = match cell? {
        Data::Float(f) => Decimal::from_f64_retain(*f)?,
        Data::Int(i) => Decimal::from(*i),
        Data::String(s) => s.trim().parse::<Decimal>().ok()?,
        _ => return None,
    };
    Some(value.round_dp(2))
}

/// Integer counter: blank cells default to 0, non-numeric cells are an error.
pub fn cell_count(cell: Option<&Data>) -> Option<i32> {
    match cell {
        None | Some(Data::Empty) => Some(0),
        Some(Data::Float(f)) => Some(*f as i32),
        Some(Data::Int(i)) => Some(*i as i32),
        Some(Data::Bool(b)) => Some(*b as i32),
        Some(Data::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                Some(0)
            } else {
                t.parse::<i32>().ok()
            }
        }
        _ => None,
    }
}

/// Column titles for the work-details counters as operators see them in the
/// uploaded sheets; row-local error messages use these, not the field names.
fn counter_label(field: &str) -> &str {
    match field {
        "worked_days" => "Días Laborados",
        "non_worked_days" => "Días No Laborados",
        "worked_hours" => "Horas Laboradas",
        "discount_academic_hours" => "Descuento Horas Académicas",
        "discount_lateness" => "Descuento Tardanzas",
        "personal_leave_hours" => "Horas Permiso Personal",
        "sunday_discount" => "Descuento Dominical",
        "vacation_days" => "Días Vacaciones",
        "vacation_hours" => "Horas Vacaciones",
        other => other,
    }
}

/// Parses a payslip period like "ENERO 2024" into the first day of the month.
///
/// An unknown month token silently falls back to January; the year must parse.
/// That asymmetry matches the production sheets this feeds from, so "XYZ 2024"
/// lands on 2024-01-01 while "ENERO" alone is rejected.
pub fn parse_period(text: &str) -> Option<NaiveDate> {
    let upper = text.trim().to_uppercase();
    let mut parts = upper.split_whitespace();
    let month_token = parts.next()?;
    let year: i32 = parts.next()?.parse().ok()?;

    let month = SPANISH_MONTHS
        .iter()
        .find(|(name, _)| *name == month_token)
        .map(|(_, m)| *m)
        .unwrap_or(1);

    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Builds an employee record from a data row, or a row-local failure message.
pub fn normalize_employee(row_idx: usize, row: &[Data], map: &ColumnMap) -> Result<EmployeeRow, String> {
    let dni = cell_upper(map.cell(row, "dni"));
    let last_name = cell_upper(map.cell(row, "last_name"));
    let first_name = cell_upper(map.cell(row, "first_name"));

    let (Some(dni), Some(last_name), Some(first_name)) = (dni, last_name, first_name) else {
        return Err(format!(
            "Fila {}: DNI, apellidos y nombres son obligatorios. Se saltó la fila.",
            row_idx
        ));
    };

    Ok(EmployeeRow {
        dni,
        last_name,
        first_name,
        email: cell_str(map.cell(row, "email")),
        position: cell_upper(map.cell(row, "position")),
        description: cell_upper(map.cell(row, "description")),
        description_sp: cell_upper(map.cell(row, "description_sp")),
        start_date: cell_date(map.cell(row, "start_date")),
        end_date: cell_date(map.cell(row, "end_date")),
        resigned_date: cell_date(map.cell(row, "resigned_date")),
        resigned: cell_resigned(map.cell(row, "resigned")),
        regimen: cell_upper(map.cell(row, "regimen")),
        category: cell_upper(map.cell(row, "category")),
        condition: cell_upper(map.cell(row, "condition")),
        identification_code: cell_upper(map.cell(row, "identification_code")),
        establishment: cell_upper(map.cell(row, "establishment")),
    })
}

/// Builds a work-details record; every counter must be a non-negative integer.
pub fn normalize_work_details(row_idx: usize, row: &[Data], map: &ColumnMap) -> Result<WorkDetailsRow, String> {
    let Some(dni) = cell_str(map.cell(row, "dni")) else {
        return Err(format!("Fila {}: DNI no encontrado. Se saltó la fila.", row_idx));
    };

    let counter = |field: &str| -> Result<i32, String> {
        let value = cell_count(map.cell(row, field)).ok_or_else(|| {
            format!(
                "Fila {}: Valor no numérico en '{}'. Se saltó la fila.",
                row_idx,
                counter_label(field)
            )
        })?;
        if value < 0 {
            return Err(format!(
                "Fila {}: Valor negativo en '{}'. Se saltó la fila.",
                row_idx,
                counter_label(field)
            ));
        }
        Ok(value)
    };

    Ok(WorkDetailsRow {
        worked_days: counter("worked_days")?,
        non_worked_days: counter("non_worked_days")?,
        worked_hours: counter("worked_hours")?,
        discount_academic_hours: counter("discount_academic_hours")?,
        discount_lateness: counter("discount_lateness")?,
        personal_leave_hours: counter("personal_leave_hours")?,
        sunday_discount: counter("sunday_discount")?,
        vacation_days: counter("vacation_days")?,
        vacation_hours: counter("vacation_hours")?,
        dni,
    })
}

/// Builds a payslip record; DNI, period, amount and position must be valid.
pub fn normalize_payslip(row_idx: usize, row: &[Data], map: &ColumnMap) -> Result<PayslipRow, String> {
    let Some(dni) = cell_str(map.cell(row, "dni")) else {
        return Err(format!("Fila {}: DNI no encontrado. Se saltó la fila.", row_idx));
    };

    let period_text = cell_str(map.cell(row, "issue_date")).unwrap_or_default();
    let Some(issue_date) = parse_period(&period_text) else {
        return Err(format!(
            "Fila {}: Periodo '{}' inválido. Se saltó la fila.",
            row_idx, period_text
        ));
    };

    let Some(amount) = cell_decimal(map.cell(row, "amount")) else {
        let raw = cell_str(map.cell(row, "amount")).unwrap_or_default();
        return Err(format!(
            "Fila {}: Monto inválido '{}'. Se saltó la fila.",
            row_idx, raw
        ));
    };

    let position_order = match cell_count(map.cell(row, "position_order")) {
        Some(p) if p >= 0 => p,
        _ => {
            let raw = cell_str(map.cell(row, "position_order")).unwrap_or_default();
            return Err(format!(
                "Fila {}: Posición inválida '{}'. Se saltó la fila.",
                row_idx, raw
            ));
        }
    };

    Ok(PayslipRow {
        dni,
        concept: cell_upper(map.cell(row, "concept")),
        amount,
        data_source: cell_upper(map.cell(row, "data_source")),
        payroll_type: cell_upper(map.cell(row, "payroll_type")),
        data_type: cell_upper(map.cell(row, "data_type")),
        position_order,
        issue_date,
    })
}
