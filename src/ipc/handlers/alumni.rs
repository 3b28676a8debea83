use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{csv_quote, get_opt_str, get_required_str, write_text_file};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

use super::import::{
    existing_to_json, record_from_value, record_to_json, validate_record,
    validate_record_for_merge, ProvisionLog,
};
use super::setup;

fn row_to_json(row: &db::AlumniRow) -> Value {
    let mut v = existing_to_json(row);
    v["id"] = Value::String(row.id.clone());
    v
}

fn handle_alumni_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "alumni": [] }));
    };

    let mut sql = String::from(
        "SELECT id, student_no, name, graduation_date, program,
                mobile_number, email, personal_email, extra_fields
         FROM alumni WHERE 1=1",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(q) = get_opt_str(&req.params, "q") {
        sql.push_str(" AND (name LIKE ? OR student_no LIKE ?)");
        let pattern = format!("%{}%", q);
        binds.push(pattern.clone());
        binds.push(pattern);
    }
    if let Some(program) = get_opt_str(&req.params, "program") {
        sql.push_str(" AND program = ?");
        binds.push(program);
    }
    if let Some(date) = get_opt_str(&req.params, "cohortDate") {
        sql.push_str(" AND graduation_date = ?");
        binds.push(date);
    }
    sql.push_str(" ORDER BY name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |row| {
            Ok(db::AlumniRow {
                id: row.get(0)?,
                student_no: row.get(1)?,
                name: row.get(2)?,
                graduation_date: row.get(3)?,
                program: row.get(4)?,
                mobile_number: row.get(5)?,
                email: row.get(6)?,
                personal_email: row.get(7)?,
                extra_fields_json: row.get(8)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(list) => {
            let alumni: Vec<Value> = list.iter().map(row_to_json).collect();
            ok(&req.id, json!({ "alumni": alumni }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_alumni_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_no = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match db::fetch_by_student_no(conn, &student_no) {
        Ok(Some(row)) => ok(&req.id, json!({ "alumnus": row_to_json(&row) })),
        Ok(None) => err(&req.id, "not_found", "no alumni record with that id", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Manual single-record entry: one degenerate import row. A conflict with
/// no explicit action halts with a resolution prompt instead of staging a
/// pending batch.
fn handle_alumni_create(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(record_value) = req.params.get("record") else {
        return err(&req.id, "bad_params", "missing record", None);
    };
    let mut record = record_from_value(record_value);

    let on_conflict = get_opt_str(&req.params, "onConflict").map(|s| s.to_ascii_lowercase());
    if let Some(action) = on_conflict.as_deref() {
        if action != "skip" && action != "overwrite" && action != "merge" {
            return err(
                &req.id,
                "bad_params",
                "onConflict must be one of: skip, overwrite, merge",
                None,
            );
        }
    }

    // A merge only touches the fields it supplies, so a partial record is
    // fine there; every other path takes the full row validation.
    let issues = if on_conflict.as_deref() == Some("merge") {
        validate_record_for_merge(&mut record)
    } else {
        validate_record(&mut record)
    };
    if !issues.is_empty() {
        let details: Vec<Value> = issues
            .iter()
            .map(|i| json!({ "code": i.code, "message": i.message }))
            .collect();
        return err(
            &req.id,
            "validation_failed",
            "record failed validation",
            Some(json!({ "issues": details })),
        );
    }

    let conflict = match db::find_conflict(conn, &record.student_no, &record.name) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let auto_provision = setup::import_auto_provision(conn);
    let mut log = ProvisionLog::new();

    let Some((existing, conflict_type)) = conflict else {
        // No collision: a merge decision degenerates to a plain insert and
        // must therefore satisfy full validation like any new record.
        if on_conflict.as_deref() == Some("merge") {
            let issues = validate_record(&mut record);
            if !issues.is_empty() {
                let details: Vec<Value> = issues
                    .iter()
                    .map(|i| json!({ "code": i.code, "message": i.message }))
                    .collect();
                return err(
                    &req.id,
                    "validation_failed",
                    "record failed validation",
                    Some(json!({ "issues": details })),
                );
            }
        }
        if let Err(e) = log.provision(conn, auto_provision, &record) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
        return match db::alumni_insert(conn, &record) {
            Ok(()) => ok(
                &req.id,
                json!({
                    "status": "created",
                    "studentId": record.student_no,
                    "newCohorts": log.new_cohorts,
                    "newPrograms": log.new_programs
                }),
            ),
            Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
        };
    };

    let Some(action) = on_conflict else {
        // Nothing written; the caller must come back with a decision.
        return ok(
            &req.id,
            json!({
                "status": "conflict",
                "conflictType": conflict_type.as_str(),
                "existing": existing_to_json(&existing),
                "incoming": record_to_json(&record)
            }),
        );
    };

    match action.as_str() {
        "skip" => ok(&req.id, json!({ "status": "skipped" })),
        "overwrite" => {
            if let Err(e) = log.provision(conn, auto_provision, &record) {
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
            match db::alumni_overwrite(conn, &existing.student_no, &record) {
                Ok(true) => ok(
                    &req.id,
                    json!({
                        "status": "overwritten",
                        "studentId": record.student_no,
                        "newCohorts": log.new_cohorts,
                        "newPrograms": log.new_programs
                    }),
                ),
                Ok(false) => err(&req.id, "not_found", "conflicting record vanished", None),
                Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
            }
        }
        _ => {
            if let Err(e) = log.provision(conn, auto_provision, &record) {
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
            match db::alumni_merge(conn, &existing.student_no, &record) {
                Ok(db::MergeOutcome::Updated) => ok(
                    &req.id,
                    json!({ "status": "merged", "changed": true }),
                ),
                Ok(db::MergeOutcome::NoOp) => ok(
                    &req.id,
                    json!({ "status": "merged", "changed": false }),
                ),
                Ok(db::MergeOutcome::Missing) => {
                    err(&req.id, "not_found", "conflicting record vanished", None)
                }
                Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
            }
        }
    }
}

fn handle_alumni_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_no = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(record_value) = req.params.get("record") else {
        return err(&req.id, "bad_params", "missing record", None);
    };
    let mut record = record_from_value(record_value);
    let issues = validate_record(&mut record);
    if !issues.is_empty() {
        let details: Vec<Value> = issues
            .iter()
            .map(|i| json!({ "code": i.code, "message": i.message }))
            .collect();
        return err(
            &req.id,
            "validation_failed",
            "record failed validation",
            Some(json!({ "issues": details })),
        );
    }

    match db::alumni_overwrite(conn, &student_no, &record) {
        Ok(true) => ok(&req.id, json!({ "status": "updated", "studentId": record.student_no })),
        Ok(false) => err(&req.id, "not_found", "no alumni record with that id", None),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_alumni_delete(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_no = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM alumni WHERE student_no = ?", [&student_no]) {
        Ok(0) => err(&req.id, "not_found", "no alumni record with that id", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_alumni_export_csv(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT student_no, name, graduation_date, program,
                mobile_number, email, personal_email, extra_fields
         FROM alumni ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let cols: [String; 8] = [
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ];
            Ok(cols)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = String::from(
        "studentId,name,graduationDate,program,mobileNumber,email,personalEmail,extraFields\n",
    );
    for cols in &rows {
        let line: Vec<String> = cols.iter().map(|c| csv_quote(c)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }

    if let Err(e) = write_text_file(&out_path, &out) {
        return e.response(&req.id);
    }
    ok(&req.id, json!({ "outPath": out_path, "rows": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "alumni.list" => Some(handle_alumni_list(state, req)),
        "alumni.get" => Some(handle_alumni_get(state, req)),
        "alumni.create" => Some(handle_alumni_create(state, req)),
        "alumni.update" => Some(handle_alumni_update(state, req)),
        "alumni.delete" => Some(handle_alumni_delete(state, req)),
        "alumni.exportCsv" => Some(handle_alumni_export_csv(state, req)),
        _ => None,
    }
}
