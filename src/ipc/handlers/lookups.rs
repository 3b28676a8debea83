use crate::dates;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_cohorts_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "cohorts": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           gc.date,
           gc.label,
           (SELECT COUNT(*) FROM alumni a WHERE a.graduation_date = gc.date) AS alumni_count
         FROM graduation_cohorts gc
         ORDER BY gc.date",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let date: String = row.get(0)?;
            let label: String = row.get(1)?;
            let alumni_count: i64 = row.get(2)?;
            Ok(json!({
                "date": date,
                "label": label,
                "alumniCount": alumni_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(cohorts) => ok(&req.id, json!({ "cohorts": cohorts })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_cohorts_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let raw_date = match get_required_str(&req.params, "date") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let date = dates::normalize_date_input(&raw_date);
    if !dates::is_iso_date(&date) {
        return err(
            &req.id,
            "bad_params",
            format!("unrecognized graduation date: {}", raw_date),
            None,
        );
    }
    let label = get_opt_str(&req.params, "label").unwrap_or_else(|| dates::cohort_label(&date));

    let created = match db::cohort_exists(conn, &date) {
        Ok(v) => !v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = db::upsert_cohort(conn, &date, &label) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "date": date, "label": label, "created": created }),
    )
}

fn handle_cohorts_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let date = match get_required_str(&req.params, "date") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match conn.execute("DELETE FROM graduation_cohorts WHERE date = ?", [&date]) {
        Ok(0) => err(&req.id, "not_found", "cohort not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_programs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "programs": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           p.name,
           (SELECT COUNT(*) FROM alumni a WHERE a.program = p.name) AS alumni_count
         FROM programs p
         ORDER BY p.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let alumni_count: i64 = row.get(1)?;
            Ok(json!({ "name": name, "alumniCount": alumni_count }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(programs) => ok(&req.id, json!({ "programs": programs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_programs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match get_required_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let created = match db::program_exists(conn, &name) {
        Ok(v) => !v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = db::upsert_program(conn, &name) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "name": name, "created": created }))
}

fn handle_programs_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match get_required_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match conn.execute("DELETE FROM programs WHERE name = ?", [&name]) {
        Ok(0) => err(&req.id, "not_found", "program not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lookups.cohorts.list" => Some(handle_cohorts_list(state, req)),
        "lookups.cohorts.create" => Some(handle_cohorts_create(state, req)),
        "lookups.cohorts.delete" => Some(handle_cohorts_delete(state, req)),
        "lookups.programs.list" => Some(handle_programs_list(state, req)),
        "lookups.programs.create" => Some(handle_programs_create(state, req)),
        "lookups.programs.delete" => Some(handle_programs_delete(state, req)),
        _ => None,
    }
}
