use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const DB_FILE: &str = "alumni.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS alumni(
            id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL,
            name TEXT NOT NULL,
            graduation_date TEXT NOT NULL,
            program TEXT NOT NULL,
            mobile_number TEXT NOT NULL,
            email TEXT NOT NULL,
            personal_email TEXT NOT NULL,
            extra_fields TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_alumni_student_no ON alumni(student_no)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_alumni_name ON alumni(name)",
        [],
    )?;

    // Existing workspaces may predate the updated_at column. Add if needed.
    ensure_alumni_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS graduation_cohorts(
            date TEXT PRIMARY KEY,
            label TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            name TEXT PRIMARY KEY
        )",
        [],
    )?;

    // Staged import batches awaiting conflict resolution, keyed by batch id.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_batches(
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            clean_json TEXT NOT NULL,
            conflicts_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_alumni_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "alumni", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE alumni ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_unix_string() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

/// An incoming alumni record, validated and normalized, with extras unified
/// into one ordered key/value list regardless of which call site produced it.
#[derive(Debug, Clone)]
pub struct AlumniRecord {
    pub student_no: String,
    pub name: String,
    pub graduation_date: String,
    pub program: String,
    pub mobile_number: String,
    pub email: String,
    pub personal_email: String,
    pub extra_fields: Vec<(String, String)>,
}

/// A persisted alumni row as stored.
#[derive(Debug, Clone)]
pub struct AlumniRow {
    pub id: String,
    pub student_no: String,
    pub name: String,
    pub graduation_date: String,
    pub program: String,
    pub mobile_number: String,
    pub email: String,
    pub personal_email: String,
    pub extra_fields_json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    StudentId,
    Name,
}

impl ConflictType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StudentId => "student_id",
            Self::Name => "name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Updated,
    NoOp,
    Missing,
}

const ALUMNI_COLUMNS: &str = "id, student_no, name, graduation_date, program, \
                              mobile_number, email, personal_email, extra_fields";

fn row_from_stmt(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlumniRow> {
    Ok(AlumniRow {
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
}

pub fn fetch_by_student_no(
    conn: &Connection,
    student_no: &str,
) -> anyhow::Result<Option<AlumniRow>> {
    let sql = format!("SELECT {} FROM alumni WHERE student_no = ?", ALUMNI_COLUMNS);
    Ok(conn
        .query_row(&sql, [student_no], row_from_stmt)
        .optional()?)
}

/// Duplicate detection for an incoming record: exact student-number match
/// first, then case-insensitive exact name match. First row wins; the
/// tie-break among same-named duplicates is arbitrary and not relied upon.
pub fn find_conflict(
    conn: &Connection,
    student_no: &str,
    name: &str,
) -> anyhow::Result<Option<(AlumniRow, ConflictType)>> {
    if let Some(row) = fetch_by_student_no(conn, student_no)? {
        return Ok(Some((row, ConflictType::StudentId)));
    }
    let sql = format!(
        "SELECT {} FROM alumni WHERE name = ? COLLATE NOCASE ORDER BY rowid LIMIT 1",
        ALUMNI_COLUMNS
    );
    let by_name = conn.query_row(&sql, [name], row_from_stmt).optional()?;
    Ok(by_name.map(|row| (row, ConflictType::Name)))
}

/// Drop entries with an empty key or empty value, trimming both.
pub fn compact_extras(extras: &[(String, String)]) -> Vec<(String, String)> {
    extras
        .iter()
        .filter_map(|(k, v)| {
            let k = k.trim();
            let v = v.trim();
            if k.is_empty() || v.is_empty() {
                None
            } else {
                Some((k.to_string(), v.to_string()))
            }
        })
        .collect()
}

/// Serialize extras to a JSON object in insertion order. An empty list
/// serializes to "{}", never to null.
pub fn extras_to_json(extras: &[(String, String)]) -> String {
    let mut map = Map::new();
    for (k, v) in extras {
        map.insert(k.clone(), Value::String(v.clone()));
    }
    Value::Object(map).to_string()
}

pub fn extras_from_json(raw: &str) -> Vec<(String, String)> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };
    map.into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

pub fn alumni_insert(conn: &Connection, record: &AlumniRecord) -> anyhow::Result<()> {
    let extras = compact_extras(&record.extra_fields);
    conn.execute(
        "INSERT INTO alumni(id, student_no, name, graduation_date, program,
                            mobile_number, email, personal_email, extra_fields, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &record.student_no,
            &record.name,
            &record.graduation_date,
            &record.program,
            &record.mobile_number,
            &record.email,
            &record.personal_email,
            extras_to_json(&extras),
            now_unix_string(),
        ),
    )?;
    Ok(())
}

/// Replace every column of the row currently keyed by `target_student_no`
/// with the incoming record, extras included.
pub fn alumni_overwrite(
    conn: &Connection,
    target_student_no: &str,
    record: &AlumniRecord,
) -> anyhow::Result<bool> {
    let extras = compact_extras(&record.extra_fields);
    let changed = conn.execute(
        "UPDATE alumni
         SET student_no = ?, name = ?, graduation_date = ?, program = ?,
             mobile_number = ?, email = ?, personal_email = ?, extra_fields = ?, updated_at = ?
         WHERE student_no = ?",
        (
            &record.student_no,
            &record.name,
            &record.graduation_date,
            &record.program,
            &record.mobile_number,
            &record.email,
            &record.personal_email,
            extras_to_json(&extras),
            now_unix_string(),
            target_student_no,
        ),
    )?;
    Ok(changed > 0)
}

/// Field-level merge against the currently persisted row. A scalar column
/// is updated only when the incoming value is non-empty and differs from
/// the stored value. Extras are recomputed as stored-overlaid-with-incoming
/// (incoming wins per key, stored keys absent from incoming survive). When
/// nothing would change, no write is issued.
pub fn alumni_merge(
    conn: &Connection,
    target_student_no: &str,
    record: &AlumniRecord,
) -> anyhow::Result<MergeOutcome> {
    let Some(current) = fetch_by_student_no(conn, target_student_no)? else {
        return Ok(MergeOutcome::Missing);
    };

    let pick = |incoming: &str, stored: &str| -> (String, bool) {
        let incoming = incoming.trim();
        if !incoming.is_empty() && incoming != stored {
            (incoming.to_string(), true)
        } else {
            (stored.to_string(), false)
        }
    };

    let (student_no, c1) = pick(&record.student_no, &current.student_no);
    let (name, c2) = pick(&record.name, &current.name);
    let (graduation_date, c3) = pick(&record.graduation_date, &current.graduation_date);
    let (program, c4) = pick(&record.program, &current.program);
    let (mobile_number, c5) = pick(&record.mobile_number, &current.mobile_number);
    let (email, c6) = pick(&record.email, &current.email);
    let (personal_email, c7) = pick(&record.personal_email, &current.personal_email);

    let mut merged_extras = extras_from_json(&current.extra_fields_json);
    for (k, v) in compact_extras(&record.extra_fields) {
        if let Some(entry) = merged_extras.iter_mut().find(|(ek, _)| *ek == k) {
            entry.1 = v;
        } else {
            merged_extras.push((k, v));
        }
    }
    let extras_json = extras_to_json(&merged_extras);
    let extras_changed = extras_json != current.extra_fields_json;

    if !(c1 || c2 || c3 || c4 || c5 || c6 || c7 || extras_changed) {
        return Ok(MergeOutcome::NoOp);
    }

    conn.execute(
        "UPDATE alumni
         SET student_no = ?, name = ?, graduation_date = ?, program = ?,
             mobile_number = ?, email = ?, personal_email = ?, extra_fields = ?, updated_at = ?
         WHERE id = ?",
        (
            &student_no,
            &name,
            &graduation_date,
            &program,
            &mobile_number,
            &email,
            &personal_email,
            &extras_json,
            now_unix_string(),
            &current.id,
        ),
    )?;
    Ok(MergeOutcome::Updated)
}

pub fn cohort_exists(conn: &Connection, date: &str) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM graduation_cohorts WHERE date = ?",
            [date],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Idempotent by construction: a race between two imports creating the same
/// cohort resolves at the storage layer, not via locking.
pub fn upsert_cohort(conn: &Connection, date: &str, label: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO graduation_cohorts(date, label) VALUES(?, ?)
         ON CONFLICT(date) DO UPDATE SET label = excluded.label",
        (date, label),
    )?;
    Ok(())
}

pub fn program_exists(conn: &Connection, name: &str) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM programs WHERE name = ?", [name], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(hit.is_some())
}

pub fn upsert_program(conn: &Connection, name: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO programs(name) VALUES(?)
         ON CONFLICT(name) DO UPDATE SET name = excluded.name",
        [name],
    )?;
    Ok(())
}
