mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn bulk_create_reports_counts_and_is_rerunnable() {
    let workspace = temp_dir("planbook-bulk");
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
        "classes.create",
        json!({ "name": "7B Math" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.slots.save",
        json!({ "slots": [
            { "id": "slot-a", "label": "P1", "startTime": "08:30", "endTime": "09:20", "durationMinutes": 50 }
        ]}),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "timetable.templates.create",
        json!({
            "teacherId": "teach-1",
            "schoolYear": "2024-2025",
            "classId": class_id,
            "timeSlotId": "slot-a",
            "dayOfWeek": 1
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.bulkCreate",
        json!({ "startDate": "2025-01-06", "endDate": "2025-01-31", "today": "2025-01-01" }),
    );
    assert_eq!(report.get("total").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(report.get("successful").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(report.get("failed").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        report.get("errors").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // Deterministic ids make a second run land on the same rows instead of
    // duplicating them.
    let rerun = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.bulkCreate",
        json!({ "startDate": "2025-01-06", "endDate": "2025-01-31", "today": "2025-01-01" }),
    );
    assert_eq!(rerun.get("successful").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(rerun.get("failed").and_then(|v| v.as_i64()), Some(0));

    let listed = request_ok(&mut stdin, &mut reader, "7", "sessions.list", json!({}));
    let count = listed
        .get("sessions")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    assert_eq!(count, 4);

    // Identity is a function of the occurrence alone, so a shifted window
    // that overlaps the first one must land on the existing rows too.
    let overlap = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.bulkCreate",
        json!({ "startDate": "2025-01-13", "endDate": "2025-01-31", "today": "2025-01-01" }),
    );
    assert_eq!(overlap.get("total").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(overlap.get("successful").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(overlap.get("failed").and_then(|v| v.as_i64()), Some(0));

    let listed = request_ok(&mut stdin, &mut reader, "9", "sessions.list", json!({}));
    let count = listed
        .get("sessions")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    assert_eq!(count, 4);
}

#[test]
fn inverted_window_is_rejected_before_any_expansion() {
    let workspace = temp_dir("planbook-window");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.generate",
        json!({ "startDate": "2025-02-01", "endDate": "2025-01-01" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.bulkCreate",
        json!({ "startDate": "2025-02-01", "endDate": "2025-01-01" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn generate_never_errors_on_an_empty_result() {
    let workspace = temp_dir("planbook-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    // No templates, no exceptions: empty sequence is a valid answer.
    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.generate",
        json!({ "startDate": "2025-01-06", "endDate": "2025-01-31" }),
    );
    assert_eq!(
        generated.get("sessions").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}
