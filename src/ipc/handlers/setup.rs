use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Import,
    Directory,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "directory" => Some(Self::Directory),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Import => "setup.import",
            Self::Directory => "setup.directory",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Import => json!({
            "defaultResolveAction": "skip",
            "autoProvisionLookups": true
        }),
        SetupSection::Directory => json!({
            "defaultSortBy": "name",
            "pageSize": 50
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Import => match k.as_str() {
                "defaultResolveAction" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if s != "skip" && s != "overwrite" && s != "merge" {
                        return Err(
                            "defaultResolveAction must be one of: skip, overwrite, merge".into()
                        );
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "autoProvisionLookups" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown import field: {}", k)),
            },
            SetupSection::Directory => match k.as_str() {
                "defaultSortBy" => {
                    let s = parse_string_max(v, k, 24)?.to_ascii_lowercase();
                    if s != "name" && s != "studentno" && s != "graduationdate" {
                        return Err(
                            "defaultSortBy must be one of: name, studentNo, graduationDate".into(),
                        );
                    }
                    let canonical = if s == "studentno" {
                        "studentNo"
                    } else if s == "graduationdate" {
                        "graduationDate"
                    } else {
                        "name"
                    };
                    obj.insert(k.clone(), Value::String(canonical.to_string()));
                }
                "pageSize" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 10, 500)?));
                }
                _ => return Err(format!("unknown directory field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> Value {
    let mut current = default_section(section);
    if let Ok(Some(stored)) = db::settings_get_json(conn, section.key()) {
        if let (Some(cur), Some(st)) = (current.as_object_mut(), stored.as_object()) {
            for (k, v) in st {
                cur.insert(k.clone(), v.clone());
            }
        }
    }
    current
}

fn get_setup_string(
    conn: &rusqlite::Connection,
    section: SetupSection,
    field: &str,
    default: &str,
) -> String {
    load_section(conn, section)
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn import_default_resolve_action(conn: &rusqlite::Connection) -> String {
    get_setup_string(conn, SetupSection::Import, "defaultResolveAction", "skip")
        .to_ascii_lowercase()
}

pub fn import_auto_provision(conn: &rusqlite::Connection) -> bool {
    load_section(conn, SetupSection::Import)
        .get("autoProvisionLookups")
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "section must be one of: import, directory",
            None,
        );
    };
    ok(&req.id, json!({ "settings": load_section(conn, section) }))
}

fn handle_setup_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "section must be one of: import, directory",
            None,
        );
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be object", None);
    };

    let mut current = load_section(conn, section);
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "settings": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.set" => Some(handle_setup_set(state, req)),
        _ => None,
    }
}
