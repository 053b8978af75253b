//! Workbook loading and header resolution
//!
//! The first worksheet row is a literal header row. Each header is normalized
//! (accents stripped, whitespace removed, lowercased) and matched against a
//! fixed alias table per import shape. The column map produced here drives the
//! row normalizers in `rows`.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{Data, Range, Reader, Xlsx};

use crate::import::ImportError;

/// Canonical field -> accepted header spellings, employee import.
/// Aliases are compared after `normalize`, so accents and spacing are free.
pub const EMPLOYEE_COLUMNS: &[(&str, &[&str])] = &[
    ("dni", &["dni"]),
    ("last_name", &["apellidos", "apellido", "last name"]),
    ("first_name", &["nombres", "nombre", "first name"]),
    ("start_date", &["fecha inicio", "fechainicio"]),
    ("position", &["nombre de cargo", "cargo", "position", "NombreCargo"]),
    ("description", &["descripcion", "description"]),
    ("condition", &["condicion", "condition"]),
    ("category", &["categoria", "category"]),
    ("regimen", &["regimen", "regime"]),
    (
        "identification_code",
        &["codigo de identificacion", "codigo", "identification code", "CodigoIdentificacion"],
    ),
    ("role", &["tipo", "rol", "role"]),
    ("description_sp", &["descripcionSP", "descripcion sp", "descripcionsistema"]),
    ("end_date", &["fecha fin", "end date"]),
    ("resigned_date", &["fecha renuncia", "fecha de renuncia", "resigned date"]),
    ("resigned", &["con renuncia", "resigned"]),
    ("establishment", &["establecimiento", "establishment"]),
];

/// Optional columns are resolved like required ones but never counted as missing.
pub const EMPLOYEE_OPTIONAL_COLUMNS: &[(&str, &[&str])] =
    &[("email", &["email", "correo", "correo electronico"])];

pub const WORK_DETAIL_COLUMNS: &[(&str, &[&str])] = &[
    ("dni", &["dni"]),
    ("worked_days", &["dias laborados", "DiasLaborados"]),
    ("non_worked_days", &["dias no laborados", "DiasNoLaborados"]),
    ("worked_hours", &["horas laboradas", "HorasLaboradas"]),
    ("discount_academic_hours", &["descuento horas academicas", "DescuentoHorasAcademicas"]),
    ("discount_lateness", &["descuento tardanzas", "DescuentoTardanzas"]),
    ("personal_leave_hours", &["horas permiso personal", "HorasPermisoPersonal"]),
    ("sunday_discount", &["descuento dominical", "DescuentoDominical"]),
    ("vacation_days", &["dias vacaciones", "DiasVacaciones"]),
    ("vacation_hours", &["horas vacaciones", "HorasVacaciones"]),
];

pub const PAYSLIP_COLUMNS: &[(&str, &[&str])] = &[
    ("dni", &["DNI"]),
    ("concept", &["Concepto"]),
    ("amount", &["Monto"]),
    ("data_source", &["OrigenDato"]),
    ("payroll_type", &["TipoPlanilla"]),
    ("data_type", &["TipoDato"]),
    ("position_order", &["Posicion"]),
    ("issue_date", &["Periodo"]),
];

/// Strips accents, removes whitespace and lowercases, so "Fecha Inicio",
/// "FECHAINICIO" and "fecha inició" all compare equal.
pub fn normalize(s: &str) -> String {
    s.chars()
        .map(fold_accent)
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Folds Latin letters with diacritics onto their base letter (NFD + strip
/// combining marks, for the character set seen in Spanish payroll sheets).
fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'a',
        'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'u',
        'ñ' | 'Ñ' => 'n',
        other => other,
    }
}

/// Column index resolution for one import shape.
#[derive(Debug)]
pub struct ColumnMap {
    by_field: HashMap<&'static str, usize>,
}

impl ColumnMap {
    /// Returns the cell mapped to `field` for the given data row, if the column
    /// was present and the row is wide enough.
    pub fn cell<'r>(&self, row: &'r [Data], field: &str) -> Option<&'r Data> {
        self.by_field.get(field).and_then(|&idx| row.get(idx))
    }

    #[cfg(test)]
    pub fn column(&self, field: &str) -> Option<usize> {
        self.by_field.get(field).copied()
    }
}

/// Maps the literal header row to canonical field names.
///
/// The first column that matches a field claims it; later columns matching an
/// already-mapped field are silently ignored. Returns the full list of missing
/// required fields so the caller can fail the batch with one message.
pub fn resolve_headers(
    headers: &[String],
    required: &'static [(&'static str, &'static [&'static str])],
    optional: &'static [(&'static str, &'static [&'static str])],
) -> Result<ColumnMap, Vec<&'static str>> {
    let mut by_field: HashMap<&'static str, usize> = HashMap::new();

    for (idx, header) in headers.iter().enumerate() {
        let nh = normalize(header);
        if nh.is_empty() {
            continue;
        }
        for (field, aliases) in required.iter().chain(optional.iter()) {
            if by_field.contains_key(field) {
                continue;
            }
            if aliases.iter().any(|a| normalize(a) == nh) {
                by_field.insert(*field, idx);
                break;
            }
        }
    }

    let missing: Vec<&'static str> = required
        .iter()
        .map(|(field, _)| *field)
        .filter(|field| !by_field.contains_key(field))
        .collect();

    if missing.is_empty() {
        Ok(ColumnMap { by_field })
    } else {
        Err(missing)
    }
}

/// Opens an uploaded `.xlsx` from memory and returns the first worksheet.
pub fn load_first_sheet(bytes: &[u8]) -> Result<Range<Data>, ImportError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Workbook(e.to_string()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let first = sheet_names.first().ok_or(ImportError::EmptyWorkbook)?;

    workbook
        .worksheet_range(first)
        .map_err(|e| ImportError::Workbook(e.to_string()))
}

/// Extracts the literal header row as strings.
pub fn header_row(range: &Range<Data>) -> Vec<String> {
    range
        .rows()
        .next()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::String(s) => s.trim().to_string(),
                    Data::Empty => String::new(),
                    other => format!("{}", other),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_strips_accents_spaces_case() {
        assert_eq!(normalize("Fecha Inicio"), "fechainicio");
        assert_eq!(normalize("Descripción"), "descripcion");
        assert_eq!(normalize("  CÓDIGO de Identificación "), "codigodeidentificacion");
        assert_eq!(normalize("Año"), "ano");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_employee_headers_all_resolve() {
        let hs = headers(&[
            "DNI",
            "Apellidos",
            "Nombres",
            "Fecha Inicio",
            "Cargo",
            "Descripcion",
            "Condicion",
            "Categoria",
            "Regimen",
            "Codigo",
            "Tipo",
            "DescripcionSP",
            "Fecha Fin",
            "Fecha Renuncia",
            "Con Renuncia",
            "Establecimiento",
        ]);

        let map = resolve_headers(&hs, EMPLOYEE_COLUMNS, EMPLOYEE_OPTIONAL_COLUMNS).unwrap();
        for (field, _) in EMPLOYEE_COLUMNS {
            assert!(map.column(field).is_some(), "field {} unresolved", field);
        }
    }

    #[test]
    fn test_accented_headers_resolve() {
        let hs = headers(&["DNI", "Apellidos", "Nombres", "Código de Identificación"]);
        let map = resolve_headers(&hs, EMPLOYEE_COLUMNS, &[]);
        // Still missing most fields, but the accented code column must match.
        let missing = map.unwrap_err();
        assert!(!missing.contains(&"identification_code"));
        assert!(missing.contains(&"start_date"));
    }

    #[test]
    fn test_missing_columns_listed() {
        let hs = headers(&["DNI", "Concepto", "Monto"]);
        let missing = resolve_headers(&hs, PAYSLIP_COLUMNS, &[]).unwrap_err();
        assert_eq!(
            missing,
            vec!["data_source", "payroll_type", "data_type", "position_order", "issue_date"]
        );
    }

    #[test]
    fn test_first_matching_column_wins() {
        // Two columns both spell DNI; the first occurrence takes precedence.
        let hs = headers(&["DNI", "dni", "Concepto", "Monto", "OrigenDato", "TipoPlanilla", "TipoDato", "Posicion", "Periodo"]);
        let map = resolve_headers(&hs, PAYSLIP_COLUMNS, &[]).unwrap();
        assert_eq!(map.column("dni"), Some(0));
    }

    #[test]
    fn test_optional_email_resolved_but_not_required() {
        let hs = headers(&["Correo Electronico", "DNI"]);
        let result = resolve_headers(&hs, PAYSLIP_COLUMNS, EMPLOYEE_OPTIONAL_COLUMNS);
        let missing = result.unwrap_err();
        assert!(!missing.contains(&"email"));
        assert!(missing.contains(&"concept"));
    }

    #[test]
    fn test_cell_lookup_out_of_range_row() {
        let hs = headers(&["DNI", "Concepto", "Monto", "OrigenDato", "TipoPlanilla", "TipoDato", "Posicion", "Periodo"]);
        let map = resolve_headers(&hs, PAYSLIP_COLUMNS, &[]).unwrap();
        // Short row: trailing cells simply resolve to None.
        let row = vec![Data::String("12345678".into())];
        assert!(map.cell(&row, "dni").is_some());
        assert!(map.cell(&row, "issue_date").is_none());
    }
}
