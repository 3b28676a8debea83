mod test_support;

use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

fn seed(stdin: &mut std::process::ChildStdin, reader: &mut std::io::BufReader<std::process::ChildStdout>) {
    let records = [
        ("N-0001", "Aisha Bello", "Nursing", "2024-06-01"),
        ("N-0002", "Ben Ortiz", "Nursing", "2025-09-15"),
        ("E-0001", "Cara Novak", "Engineering", "2025-09-15"),
    ];
    for (i, (student_no, name, program, date)) in records.iter().enumerate() {
        let _ = request_ok(
            stdin,
            reader,
            &format!("seed-{i}"),
            "alumni.create",
            json!({ "record": {
                "studentId": student_no,
                "name": name,
                "graduationDate": date,
                "program": program,
                "mobileNumber": format!("555-9{i:03}"),
                "email": format!("user{i}@university.edu"),
                "personalEmail": format!("user{i}@example.com")
            }}),
        );
    }
}

#[test]
fn list_filters_by_search_program_and_cohort() {
    let workspace = temp_dir("alumnid-directory-filters");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed(&mut stdin, &mut reader);

    let by_q = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "alumni.list",
        json!({ "q": "Novak" }),
    );
    assert_eq!(by_q["alumni"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(by_q["alumni"][0]["studentId"].as_str(), Some("E-0001"));

    let by_program = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "alumni.list",
        json!({ "program": "Nursing" }),
    );
    assert_eq!(by_program["alumni"].as_array().map(|a| a.len()), Some(2));

    let by_cohort = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "alumni.list",
        json!({ "cohortDate": "2025-09-15" }),
    );
    assert_eq!(by_cohort["alumni"].as_array().map(|a| a.len()), Some(2));

    let combined = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "alumni.list",
        json!({ "program": "Nursing", "cohortDate": "2025-09-15" }),
    );
    assert_eq!(combined["alumni"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(combined["alumni"][0]["name"].as_str(), Some("Ben Ortiz"));

    // Student-number substring search works too.
    let by_no = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "alumni.list",
        json!({ "q": "E-00" }),
    );
    assert_eq!(by_no["alumni"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn update_and_delete_round_trip() {
    let workspace = temp_dir("alumnid-directory-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed(&mut stdin, &mut reader);

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "alumni.update",
        json!({ "studentId": "N-0001", "record": {
            "studentId": "N-0001",
            "name": "Aisha Bello-Smith",
            "graduationDate": "2024-06-01",
            "program": "Nursing",
            "mobileNumber": "555-9999",
            "email": "aisha@university.edu",
            "personalEmail": "aisha@example.com"
        }}),
    );
    assert_eq!(updated["status"].as_str(), Some("updated"));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "alumni.get",
        json!({ "studentId": "N-0001" }),
    );
    assert_eq!(
        fetched["alumnus"]["name"].as_str(),
        Some("Aisha Bello-Smith")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "alumni.delete",
        json!({ "studentId": "N-0001" }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "5",
        "alumni.get",
        json!({ "studentId": "N-0001" }),
    );
    assert_eq!(
        gone.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
    let missing_update = request(
        &mut stdin,
        &mut reader,
        "6",
        "alumni.update",
        json!({ "studentId": "N-0001", "record": {
            "studentId": "N-0001",
            "name": "Nobody",
            "graduationDate": "2024-06-01",
            "program": "Nursing",
            "mobileNumber": "555-0000",
            "email": "n@university.edu",
            "personalEmail": "n@example.com"
        }}),
    );
    assert_eq!(
        missing_update.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}

#[test]
fn export_csv_writes_directory_with_extras_column() {
    let workspace = temp_dir("alumnid-directory-export");
    let out_path = workspace.join("export").join("alumni.csv");
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
        json!({ "record": {
            "studentId": "X-0001",
            "name": "Quinn, Rae",
            "graduationDate": "2025-09-15",
            "program": "Design",
            "mobileNumber": "555-7000",
            "email": "rae.quinn@university.edu",
            "personalEmail": "rae@example.com",
            "extraFields": { "portfolio": "rae.example.com" }
        }}),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "alumni.exportCsv",
        json!({ "outPath": out_path.to_string_lossy() }),
    );
    assert_eq!(exported["rows"].as_i64(), Some(1));

    let text = std::fs::read_to_string(&out_path).expect("read export");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("studentId,name,graduationDate,program,mobileNumber,email,personalEmail,extraFields")
    );
    let row = lines.next().expect("data row");
    // The comma-bearing name is quoted, and the extras JSON round-trips.
    assert!(row.starts_with("X-0001,\"Quinn, Rae\","), "{}", row);
    assert!(row.contains("portfolio"), "{}", row);
}
