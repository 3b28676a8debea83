mod test_support;

use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

fn base_record() -> serde_json::Value {
    json!({
        "studentId": "M-0001",
        "name": "Priya Nair",
        "graduationDate": "2024-06-01",
        "program": "Pharmacy",
        "mobileNumber": "555-1000",
        "email": "priya.nair@university.edu",
        "personalEmail": "priya@example.com",
        "extraFields": { "thesis": "Pharmacokinetics" }
    })
}

#[test]
fn colliding_manual_entry_prompts_then_overwrite_replaces_and_skip_preserves() {
    let workspace = temp_dir("alumnid-manual-conflict");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "alumni.create",
        json!({ "record": base_record() }),
    );
    assert_eq!(created["status"].as_str(), Some("created"));

    // Same student id again: conflict prompt, nothing written.
    let mut resubmit = base_record();
    resubmit["name"] = json!("Priya N. Nair");
    resubmit["mobileNumber"] = json!("555-2000");
    let prompt = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "alumni.create",
        json!({ "record": resubmit }),
    );
    assert_eq!(prompt["status"].as_str(), Some("conflict"), "{}", prompt);
    assert_eq!(prompt["conflictType"].as_str(), Some("student_id"));
    assert_eq!(prompt["existing"]["name"].as_str(), Some("Priya Nair"));

    let unchanged = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "alumni.get",
        json!({ "studentId": "M-0001" }),
    );
    assert_eq!(unchanged["alumnus"]["name"].as_str(), Some("Priya Nair"));
    assert_eq!(unchanged["alumnus"]["mobileNumber"].as_str(), Some("555-1000"));

    // Skip: still nothing written.
    let skipped = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "alumni.create",
        json!({ "record": resubmit, "onConflict": "skip" }),
    );
    assert_eq!(skipped["status"].as_str(), Some("skipped"));
    let still = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "alumni.get",
        json!({ "studentId": "M-0001" }),
    );
    assert_eq!(still["alumnus"]["mobileNumber"].as_str(), Some("555-1000"));

    // Overwrite: every scalar column matches the submission exactly.
    let over = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "alumni.create",
        json!({ "record": resubmit, "onConflict": "overwrite" }),
    );
    assert_eq!(over["status"].as_str(), Some("overwritten"));
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "alumni.get",
        json!({ "studentId": "M-0001" }),
    );
    assert_eq!(after["alumnus"]["name"].as_str(), Some("Priya N. Nair"));
    assert_eq!(after["alumnus"]["mobileNumber"].as_str(), Some("555-2000"));
}

#[test]
fn name_collision_is_case_insensitive() {
    let workspace = temp_dir("alumnid-name-conflict");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "alumni.create",
        json!({ "record": base_record() }),
    );

    let mut other = base_record();
    other["studentId"] = json!("M-0002");
    other["name"] = json!("PRIYA NAIR");
    let prompt = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "alumni.create",
        json!({ "record": other }),
    );
    assert_eq!(prompt["status"].as_str(), Some("conflict"), "{}", prompt);
    assert_eq!(prompt["conflictType"].as_str(), Some("name"));
}

#[test]
fn merge_updates_only_differing_fields_and_unions_extras() {
    let workspace = temp_dir("alumnid-merge-semantics");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "alumni.create",
        json!({ "record": base_record() }),
    );

    // New mobile number, new extras key, one overridden extras key; every
    // other field resupplied unchanged or left empty.
    let incoming = json!({
        "studentId": "M-0001",
        "name": "Priya Nair",
        "graduationDate": "",
        "program": "",
        "mobileNumber": "555-3000",
        "email": "",
        "personalEmail": "",
        "extraFields": { "thesis": "Clinical Pharmacokinetics", "advisor": "Dr. Wong" }
    });
    let merged = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "alumni.create",
        json!({ "record": incoming, "onConflict": "merge" }),
    );
    assert_eq!(merged["status"].as_str(), Some("merged"), "{}", merged);
    assert_eq!(merged["changed"].as_bool(), Some(true));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "alumni.get",
        json!({ "studentId": "M-0001" }),
    );
    let alumnus = &after["alumnus"];
    // Untouched fields survive.
    assert_eq!(alumnus["graduationDate"].as_str(), Some("2024-06-01"));
    assert_eq!(alumnus["program"].as_str(), Some("Pharmacy"));
    assert_eq!(alumnus["email"].as_str(), Some("priya.nair@university.edu"));
    // The differing field updated.
    assert_eq!(alumnus["mobileNumber"].as_str(), Some("555-3000"));
    // Extras union: incoming wins per key, existing-only keys survive.
    assert_eq!(
        alumnus["extraFields"]["thesis"].as_str(),
        Some("Clinical Pharmacokinetics")
    );
    assert_eq!(alumnus["extraFields"]["advisor"].as_str(), Some("Dr. Wong"));

    // Resupplying identical data is a no-op.
    let noop = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "alumni.create",
        json!({ "record": incoming, "onConflict": "merge" }),
    );
    assert_eq!(noop["status"].as_str(), Some("merged"));
    assert_eq!(noop["changed"].as_bool(), Some(false));
}

#[test]
fn invalid_manual_entry_is_rejected_with_issue_list() {
    let workspace = temp_dir("alumnid-manual-invalid");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut bad = base_record();
    bad["email"] = json!("not-an-email");
    bad["graduationDate"] = json!("");
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "alumni.create",
        json!({ "record": bad }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );
    let issues = resp
        .pointer("/error/details/issues")
        .and_then(|v| v.as_array())
        .expect("issues array");
    let codes: Vec<&str> = issues.iter().filter_map(|i| i["code"].as_str()).collect();
    assert!(codes.contains(&"bad_email"), "{:?}", codes);
    assert!(codes.contains(&"missing_field"), "{:?}", codes);
}
