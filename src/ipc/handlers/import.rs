use crate::dates;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, parse_csv_record, valid_email, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::setup;

/// Required CSV columns, matched case-insensitively against the header row.
const REQUIRED_HEADERS: [&str; 7] = [
    "studentid",
    "name",
    "program",
    "graduationdate",
    "mobilenumber",
    "email",
    "personalemail",
];
const REQUIRED_HEADER_NAMES: [&str; 7] = [
    "studentId",
    "name",
    "program",
    "graduationDate",
    "mobileNumber",
    "email",
    "personalEmail",
];

struct RawRow {
    /// 1-based, header-inclusive: the first data row is row 2.
    row_no: usize,
    record: db::AlumniRecord,
}

pub struct RowIssue {
    pub code: &'static str,
    pub message: String,
}

/// Build a record from a params object using the wire field names. Extras
/// may arrive as an `extraFields` object, an `extraFields` array of pairs,
/// or an `extraFieldsJson` string; all three shapes are unified into one
/// ordered key/value list here, before the record reaches any writer.
pub fn record_from_value(v: &Value) -> db::AlumniRecord {
    let s = |key: &str| -> String {
        v.get(key)
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    db::AlumniRecord {
        student_no: s("studentId"),
        name: s("name"),
        graduation_date: s("graduationDate"),
        program: s("program"),
        mobile_number: s("mobileNumber"),
        email: s("email"),
        personal_email: s("personalEmail"),
        extra_fields: extras_from_value(v),
    }
}

fn extras_from_value(v: &Value) -> Vec<(String, String)> {
    if let Some(raw) = v.get("extraFieldsJson").and_then(|x| x.as_str()) {
        return db::extras_from_json(raw);
    }
    match v.get("extraFields") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, val)| {
                let val = match val {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), val)
            })
            .collect(),
        Some(Value::Array(pairs)) => pairs
            .iter()
            .filter_map(|pair| {
                let arr = pair.as_array()?;
                let k = arr.first()?.as_str()?.to_string();
                let v = arr.get(1)?.as_str()?.to_string();
                Some((k, v))
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub fn record_to_json(record: &db::AlumniRecord) -> Value {
    let mut extras = Map::new();
    for (k, v) in &record.extra_fields {
        extras.insert(k.clone(), Value::String(v.clone()));
    }
    json!({
        "studentId": record.student_no,
        "name": record.name,
        "graduationDate": record.graduation_date,
        "program": record.program,
        "mobileNumber": record.mobile_number,
        "email": record.email,
        "personalEmail": record.personal_email,
        "extraFields": Value::Object(extras),
    })
}

pub fn existing_to_json(row: &db::AlumniRow) -> Value {
    json!({
        "studentId": row.student_no,
        "name": row.name,
        "graduationDate": row.graduation_date,
        "program": row.program,
        "mobileNumber": row.mobile_number,
        "email": row.email,
        "personalEmail": row.personal_email,
        "extraFields": serde_json::from_str::<Value>(&row.extra_fields_json)
            .unwrap_or_else(|_| json!({})),
    })
}

/// Trim, require, and normalize a record in place. Returns the list of
/// row-level problems; an empty list means the record is storable.
pub fn validate_record(record: &mut db::AlumniRecord) -> Vec<RowIssue> {
    let mut issues = Vec::new();

    record.student_no = record.student_no.trim().to_string();
    record.name = record.name.trim().to_string();
    record.graduation_date = record.graduation_date.trim().to_string();
    record.program = record.program.trim().to_string();
    record.mobile_number = record.mobile_number.trim().to_string();
    record.email = record.email.trim().to_string();
    record.personal_email = record.personal_email.trim().to_string();

    let required: [(&str, &str); 7] = [
        ("studentId", &record.student_no),
        ("name", &record.name),
        ("program", &record.program),
        ("graduationDate", &record.graduation_date),
        ("mobileNumber", &record.mobile_number),
        ("email", &record.email),
        ("personalEmail", &record.personal_email),
    ];
    for (field, value) in required {
        if value.is_empty() {
            issues.push(RowIssue {
                code: "missing_field",
                message: format!("{} is required", field),
            });
        }
    }

    if !record.email.is_empty() && !valid_email(&record.email) {
        issues.push(RowIssue {
            code: "bad_email",
            message: format!("invalid email address: {}", record.email),
        });
    }
    if !record.personal_email.is_empty() && !valid_email(&record.personal_email) {
        issues.push(RowIssue {
            code: "bad_email",
            message: format!("invalid personal email address: {}", record.personal_email),
        });
    }

    if !record.graduation_date.is_empty() {
        record.graduation_date = dates::normalize_date_input(&record.graduation_date);
        if !dates::is_iso_date(&record.graduation_date) {
            issues.push(RowIssue {
                code: "bad_date",
                message: format!("unrecognized graduation date: {}", record.graduation_date),
            });
        }
    }

    issues
}

/// Merge-input validation: only the fields a merge supplies are checked.
/// Identity fields must still be present to locate the target; empty
/// attribute fields mean "leave the stored value alone".
pub fn validate_record_for_merge(record: &mut db::AlumniRecord) -> Vec<RowIssue> {
    let mut issues = Vec::new();

    record.student_no = record.student_no.trim().to_string();
    record.name = record.name.trim().to_string();
    record.graduation_date = record.graduation_date.trim().to_string();
    record.program = record.program.trim().to_string();
    record.mobile_number = record.mobile_number.trim().to_string();
    record.email = record.email.trim().to_string();
    record.personal_email = record.personal_email.trim().to_string();

    if record.student_no.is_empty() && record.name.is_empty() {
        issues.push(RowIssue {
            code: "missing_field",
            message: "studentId or name is required to locate the record".to_string(),
        });
    }
    if !record.email.is_empty() && !valid_email(&record.email) {
        issues.push(RowIssue {
            code: "bad_email",
            message: format!("invalid email address: {}", record.email),
        });
    }
    if !record.personal_email.is_empty() && !valid_email(&record.personal_email) {
        issues.push(RowIssue {
            code: "bad_email",
            message: format!("invalid personal email address: {}", record.personal_email),
        });
    }
    if !record.graduation_date.is_empty() {
        record.graduation_date = dates::normalize_date_input(&record.graduation_date);
        if !dates::is_iso_date(&record.graduation_date) {
            issues.push(RowIssue {
                code: "bad_date",
                message: format!("unrecognized graduation date: {}", record.graduation_date),
            });
        }
    }

    issues
}

/// Tracks which lookup values this batch has already created so the same
/// new cohort or program is provisioned (and reported) once.
pub struct ProvisionLog {
    seen_dates: HashSet<String>,
    seen_programs: HashSet<String>,
    pub new_cohorts: Vec<String>,
    pub new_programs: Vec<String>,
}

impl ProvisionLog {
    pub fn new() -> Self {
        Self {
            seen_dates: HashSet::new(),
            seen_programs: HashSet::new(),
            new_cohorts: Vec::new(),
            new_programs: Vec::new(),
        }
    }

    pub fn provision(
        &mut self,
        conn: &Connection,
        enabled: bool,
        record: &db::AlumniRecord,
    ) -> anyhow::Result<()> {
        if !enabled {
            return Ok(());
        }
        if dates::is_iso_date(&record.graduation_date)
            && self.seen_dates.insert(record.graduation_date.clone())
            && !db::cohort_exists(conn, &record.graduation_date)?
        {
            let label = dates::cohort_label(&record.graduation_date);
            db::upsert_cohort(conn, &record.graduation_date, &label)?;
            self.new_cohorts.push(record.graduation_date.clone());
        }
        if !record.program.is_empty()
            && self.seen_programs.insert(record.program.clone())
            && !db::program_exists(conn, &record.program)?
        {
            db::upsert_program(conn, &record.program)?;
            self.new_programs.push(record.program.clone());
        }
        Ok(())
    }
}

/// Parse the uploaded sheet: header schema check, then raw rows with extra
/// columns captured (non-empty values only). A missing required column
/// aborts the whole batch before any row is considered.
fn parse_sheet(text: &str) -> Result<Vec<RawRow>, HandlerErr> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Err(HandlerErr::new("schema_error", "file has no header row"));
    }

    let header_fields: Vec<String> = parse_csv_record(lines[0])
        .into_iter()
        .map(|s| s.trim().to_string())
        .collect();
    let mut idx = HashMap::<String, usize>::new();
    for (i, f) in header_fields.iter().enumerate() {
        idx.insert(f.to_ascii_lowercase(), i);
    }

    let mut missing = Vec::new();
    for (lower, display) in REQUIRED_HEADERS.iter().zip(REQUIRED_HEADER_NAMES.iter()) {
        if !idx.contains_key(*lower) {
            missing.push(*display);
        }
    }
    if !missing.is_empty() {
        return Err(HandlerErr::with_details(
            "schema_error",
            format!("missing required columns: {}", missing.join(", ")),
            json!({ "missingColumns": missing }),
        ));
    }

    let required_set: HashSet<usize> = REQUIRED_HEADERS
        .iter()
        .filter_map(|h| idx.get(*h).copied())
        .collect();
    let extra_columns: Vec<(usize, String)> = header_fields
        .iter()
        .enumerate()
        .filter(|(i, h)| !required_set.contains(i) && !h.is_empty())
        .map(|(i, h)| (i, h.clone()))
        .collect();

    let col = |name: &str| -> usize { idx[name] };
    let (c_student, c_name, c_program, c_date, c_mobile, c_email, c_personal) = (
        col("studentid"),
        col("name"),
        col("program"),
        col("graduationdate"),
        col("mobilenumber"),
        col("email"),
        col("personalemail"),
    );

    let mut rows = Vec::new();
    for (line_no, raw_line) in lines.iter().enumerate().skip(1) {
        if raw_line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_record(raw_line);
        let field = |i: usize| -> String {
            fields
                .get(i)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let mut extras = Vec::new();
        for (i, header) in &extra_columns {
            let value = field(*i);
            if !value.is_empty() {
                extras.push((header.clone(), value));
            }
        }

        rows.push(RawRow {
            row_no: line_no + 1,
            record: db::AlumniRecord {
                student_no: field(c_student),
                name: field(c_name),
                graduation_date: field(c_date),
                program: field(c_program),
                mobile_number: field(c_mobile),
                email: field(c_email),
                personal_email: field(c_personal),
                extra_fields: extras,
            },
        });
    }

    Ok(rows)
}

fn read_sheet(params: &Value) -> Result<(String, Vec<RawRow>), HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let text = std::fs::read_to_string(&in_path).map_err(|e| {
        HandlerErr::with_details("parse_failed", e.to_string(), json!({ "path": in_path }))
    })?;
    let rows = parse_sheet(&text)?;
    Ok((in_path, rows))
}

fn handle_import_preview(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (in_path, rows) = match read_sheet(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let rows_total = rows.len();
    let mut warnings = Vec::new();
    let mut invalid = 0usize;
    let mut clean = 0usize;
    let mut conflicts = 0usize;
    let mut would_create_cohorts = Vec::<String>::new();
    let mut would_create_programs = Vec::<String>::new();
    let mut preview_rows = Vec::new();

    for mut raw in rows {
        let issues = validate_record(&mut raw.record);
        if !issues.is_empty() {
            invalid += 1;
            for issue in &issues {
                warnings.push(json!({
                    "row": raw.row_no,
                    "code": issue.code,
                    "message": issue.message,
                }));
            }
            preview_rows.push(json!({
                "row": raw.row_no,
                "studentId": raw.record.student_no,
                "name": raw.record.name,
                "status": "invalid"
            }));
            continue;
        }

        if !would_create_cohorts.contains(&raw.record.graduation_date) {
            match db::cohort_exists(conn, &raw.record.graduation_date) {
                Ok(false) => would_create_cohorts.push(raw.record.graduation_date.clone()),
                Ok(true) => {}
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
        if !would_create_programs.contains(&raw.record.program) {
            match db::program_exists(conn, &raw.record.program) {
                Ok(false) => would_create_programs.push(raw.record.program.clone()),
                Ok(true) => {}
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }

        match db::find_conflict(conn, &raw.record.student_no, &raw.record.name) {
            Ok(Some((existing, conflict_type))) => {
                conflicts += 1;
                preview_rows.push(json!({
                    "row": raw.row_no,
                    "studentId": raw.record.student_no,
                    "name": raw.record.name,
                    "status": "conflict",
                    "conflictType": conflict_type.as_str(),
                    "existingStudentId": existing.student_no,
                }));
            }
            Ok(None) => {
                clean += 1;
                preview_rows.push(json!({
                    "row": raw.row_no,
                    "studentId": raw.record.student_no,
                    "name": raw.record.name,
                    "status": "clean"
                }));
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    ok(
        &req.id,
        json!({
            "path": in_path,
            "rowsTotal": rows_total,
            "clean": clean,
            "conflicts": conflicts,
            "invalid": invalid,
            "wouldCreateCohorts": would_create_cohorts,
            "wouldCreatePrograms": would_create_programs,
            "warnings": warnings,
            "previewRows": preview_rows
        }),
    )
}

fn handle_import_csv(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (in_path, rows) = match read_sheet(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let auto_provision = setup::import_auto_provision(conn);

    let rows_total = rows.len();
    let mut warnings = Vec::new();
    let mut invalid = 0usize;
    let mut log = ProvisionLog::new();
    let mut clean = Vec::<RawRow>::new();
    let mut conflicts = Vec::<(RawRow, db::AlumniRow, db::ConflictType)>::new();

    for mut raw in rows {
        let issues = validate_record(&mut raw.record);
        if !issues.is_empty() {
            invalid += 1;
            for issue in &issues {
                warnings.push(json!({
                    "row": raw.row_no,
                    "code": issue.code,
                    "message": issue.message,
                }));
            }
            continue;
        }

        if let Err(e) = log.provision(conn, auto_provision, &raw.record) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }

        match db::find_conflict(conn, &raw.record.student_no, &raw.record.name) {
            Ok(Some((existing, conflict_type))) => conflicts.push((raw, existing, conflict_type)),
            Ok(None) => clean.push(raw),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    if conflicts.is_empty() {
        // Nothing contested: commit the whole batch now.
        let mut inserted = 0usize;
        let mut failed = 0usize;
        for raw in &clean {
            match db::alumni_insert(conn, &raw.record) {
                Ok(()) => inserted += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(row = raw.row_no, error = %e, "insert failed");
                    warnings.push(json!({
                        "row": raw.row_no,
                        "code": "insert_failed",
                        "message": e.to_string(),
                    }));
                }
            }
        }
        tracing::info!(inserted, failed, invalid, "import committed");
        return ok(
            &req.id,
            json!({
                "status": "committed",
                "path": in_path,
                "rowsTotal": rows_total,
                "inserted": inserted,
                "failed": failed,
                "invalid": invalid,
                "newCohorts": log.new_cohorts,
                "newPrograms": log.new_programs,
                "warnings": warnings
            }),
        );
    }

    // Conflicts block the whole batch: stage everything, clean rows included,
    // so what the user reviews is exactly what will be committed.
    let batch_id = Uuid::new_v4().to_string();
    let clean_json: Vec<Value> = clean
        .iter()
        .map(|raw| {
            json!({
                "row": raw.row_no,
                "record": record_to_json(&raw.record),
            })
        })
        .collect();
    let conflicts_json: Vec<Value> = conflicts
        .iter()
        .map(|(raw, existing, conflict_type)| {
            json!({
                "row": raw.row_no,
                "conflictType": conflict_type.as_str(),
                "incoming": record_to_json(&raw.record),
                "existing": existing_to_json(existing),
            })
        })
        .collect();

    if let Err(e) = conn.execute(
        "INSERT INTO import_batches(id, created_at, clean_json, conflicts_json)
         VALUES(?, ?, ?, ?)",
        (
            &batch_id,
            db::now_unix_string(),
            Value::Array(clean_json.clone()).to_string(),
            Value::Array(conflicts_json.clone()).to_string(),
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    tracing::info!(
        batch_id = %batch_id,
        conflicts = conflicts_json.len(),
        clean = clean_json.len(),
        "import staged pending conflict resolution"
    );
    ok(
        &req.id,
        json!({
            "status": "conflicts",
            "path": in_path,
            "batchId": batch_id,
            "rowsTotal": rows_total,
            "cleanCount": clean_json.len(),
            "conflicts": conflicts_json,
            "invalid": invalid,
            "newCohorts": log.new_cohorts,
            "newPrograms": log.new_programs,
            "warnings": warnings
        }),
    )
}

struct PendingBatch {
    clean: Vec<Value>,
    conflicts: Vec<Value>,
}

fn load_batch(conn: &Connection, batch_id: &str) -> Result<Option<PendingBatch>, HandlerErr> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT clean_json, conflicts_json FROM import_batches WHERE id = ?",
            [batch_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((clean_raw, conflicts_raw)) = row else {
        return Ok(None);
    };
    let parse_rows = |raw: &str| -> Vec<Value> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
    };
    Ok(Some(PendingBatch {
        clean: parse_rows(&clean_raw),
        conflicts: parse_rows(&conflicts_raw),
    }))
}

fn handle_import_pending(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let batch_id = match get_required_str(&req.params, "batchId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match load_batch(conn, &batch_id) {
        Ok(Some(batch)) => ok(
            &req.id,
            json!({
                "batchId": batch_id,
                "clean": batch.clean,
                "conflicts": batch.conflicts
            }),
        ),
        Ok(None) => err(&req.id, "batch_not_found", "no pending batch with that id", None),
        Err(e) => e.response(&req.id),
    }
}

fn parse_resolve_action(raw: Option<&str>, default_action: &str) -> Result<String, HandlerErr> {
    let action = raw
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_action.to_string());
    if action == "skip" || action == "overwrite" || action == "merge" {
        Ok(action)
    } else {
        Err(HandlerErr::new("bad_params", "invalid action"))
    }
}

fn handle_import_resolve(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let batch_id = match get_required_str(&req.params, "batchId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let batch = match load_batch(conn, &batch_id) {
        Ok(Some(b)) => b,
        Ok(None) => {
            return err(&req.id, "batch_not_found", "no pending batch with that id", None)
        }
        Err(e) => return e.response(&req.id),
    };
    let decisions = req
        .params
        .get("decisions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let default_action = setup::import_default_resolve_action(conn);
    let auto_provision = setup::import_auto_provision(conn);

    // Map the staged conflicts by row so decisions can name their target.
    let mut staged: HashMap<i64, String> = HashMap::new();
    for entry in &batch.conflicts {
        let row = entry.get("row").and_then(|v| v.as_i64());
        let target = entry
            .pointer("/existing/studentId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        if let (Some(row), Some(target)) = (row, target) {
            staged.insert(row, target);
        }
    }

    let mut log = ProvisionLog::new();
    let mut overwritten = 0usize;
    let mut merged = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for decision in &decisions {
        let action = match parse_resolve_action(
            decision.get("action").and_then(|v| v.as_str()),
            &default_action,
        ) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        let row_no = decision.get("row").and_then(|v| v.as_i64());
        let mut record = record_from_value(decision);

        if action == "skip" {
            if let Some(r) = row_no {
                staged.remove(&r);
            }
            skipped += 1;
            continue;
        }

        // The staged batch names the record each decision collides with;
        // fall back to a fresh conflict probe for decisions without one.
        let target = match row_no.and_then(|r| staged.remove(&r)) {
            Some(t) => Some(t),
            None => match db::find_conflict(conn, &record.student_no, &record.name) {
                Ok(found) => found.map(|(existing, _)| existing.student_no),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            },
        };
        let Some(target) = target else {
            failed += 1;
            continue;
        };

        match action.as_str() {
            "overwrite" => {
                // A stale or tampered submission must not bypass validation.
                let issues = validate_record(&mut record);
                if !issues.is_empty() {
                    skipped += 1;
                    continue;
                }
                if let Err(e) = log.provision(conn, auto_provision, &record) {
                    return err(&req.id, "db_insert_failed", e.to_string(), None);
                }
                match db::alumni_overwrite(conn, &target, &record) {
                    Ok(true) => overwritten += 1,
                    Ok(false) => failed += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(target = %target, error = %e, "overwrite failed");
                    }
                }
            }
            "merge" => {
                if !record.graduation_date.is_empty() {
                    record.graduation_date = dates::normalize_date_input(&record.graduation_date);
                    if !dates::is_iso_date(&record.graduation_date) {
                        // An unparseable date never replaces a stored one.
                        record.graduation_date = String::new();
                    }
                }
                if let Err(e) = log.provision(conn, auto_provision, &record) {
                    return err(&req.id, "db_insert_failed", e.to_string(), None);
                }
                match db::alumni_merge(conn, &target, &record) {
                    Ok(db::MergeOutcome::Updated) | Ok(db::MergeOutcome::NoOp) => merged += 1,
                    Ok(db::MergeOutcome::Missing) => failed += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(target = %target, error = %e, "merge failed");
                    }
                }
            }
            _ => {}
        }
    }

    // Staged conflicts the client sent no decision for are left untouched.
    skipped += staged.len();

    // The clean set, held back while conflicts were pending, commits now.
    let mut inserted = 0usize;
    for entry in &batch.clean {
        let Some(record_value) = entry.get("record") else {
            continue;
        };
        let record = record_from_value(record_value);
        match db::alumni_insert(conn, &record) {
            Ok(()) => inserted += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(student_no = %record.student_no, error = %e, "held insert failed");
            }
        }
    }

    // The batch is finished whether or not every row succeeded; there is no
    // retry of the same batch.
    if let Err(e) = conn.execute("DELETE FROM import_batches WHERE id = ?", [&batch_id]) {
        tracing::warn!(batch_id = %batch_id, error = %e, "failed to clear resolved batch");
    }

    tracing::info!(
        batch_id = %batch_id,
        overwritten,
        merged,
        inserted,
        skipped,
        failed,
        "import batch resolved"
    );
    ok(
        &req.id,
        json!({
            "batchId": batch_id,
            "overwritten": overwritten,
            "merged": merged,
            "inserted": inserted,
            "skipped": skipped,
            "failed": failed,
            "newCohorts": log.new_cohorts,
            "newPrograms": log.new_programs
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "import.preview" => Some(handle_import_preview(state, req)),
        "import.csv" => Some(handle_import_csv(state, req)),
        "import.pending" => Some(handle_import_pending(state, req)),
        "import.resolve" => Some(handle_import_resolve(state, req)),
        _ => None,
    }
}
