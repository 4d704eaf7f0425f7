mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn seed_monday_template(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> (String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(stdin, reader, "s2", "classes.create", json!({ "name": "7B Math" }));
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "s3",
        "timetable.slots.save",
        json!({ "slots": [
            { "id": "slot-a", "label": "P1", "startTime": "08:30", "endTime": "09:20", "durationMinutes": 50 },
            { "id": "slot-b", "label": "P2", "startTime": "09:30", "endTime": "10:20", "durationMinutes": 50 }
        ]}),
    );
    let tpl = request_ok(
        stdin,
        reader,
        "s4",
        "timetable.templates.create",
        json!({
            "teacherId": "teach-1",
            "schoolYear": "2024-2025",
            "classId": class_id,
            "timeSlotId": "slot-a",
            "dayOfWeek": 1
        }),
    );
    let template_id = tpl
        .get("templateId")
        .and_then(|v| v.as_str())
        .expect("templateId")
        .to_string();
    (class_id, template_id)
}

fn generate_window(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
) -> Vec<serde_json::Value> {
    request_ok(
        stdin,
        reader,
        id,
        "sessions.generate",
        json!({ "startDate": "2025-01-06", "endDate": "2025-01-31", "today": "2025-01-01" }),
    )
    .get("sessions")
    .and_then(|v| v.as_array())
    .cloned()
    .unwrap_or_default()
}

#[test]
fn cancelled_exception_drops_the_occurrence() {
    let workspace = temp_dir("planbook-exc-cancel");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (_class_id, template_id) = seed_monday_template(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.exceptions.set",
        json!({
            "templateId": template_id,
            "exceptionDate": "2025-01-13",
            "kind": "cancelled",
            "reason": "field trip"
        }),
    );

    let sessions = generate_window(&mut stdin, &mut reader, "2");
    let dates: Vec<&str> = sessions
        .iter()
        .filter_map(|s| s.get("sessionDate").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(dates, vec!["2025-01-06", "2025-01-20", "2025-01-27"]);
}

#[test]
fn moved_exception_rewrites_slot_and_room_only() {
    let workspace = temp_dir("planbook-exc-move");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (_class_id, template_id) = seed_monday_template(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.exceptions.set",
        json!({
            "templateId": template_id,
            "exceptionDate": "2025-01-20",
            "kind": "moved",
            "newTimeSlotId": "slot-b",
            "newRoom": "Lab 2"
        }),
    );

    let sessions = generate_window(&mut stdin, &mut reader, "2");
    assert_eq!(sessions.len(), 4);
    let moved = sessions
        .iter()
        .find(|s| s.get("sessionDate").and_then(|v| v.as_str()) == Some("2025-01-20"))
        .expect("moved occurrence still present");
    assert_eq!(moved.get("timeSlotId").and_then(|v| v.as_str()), Some("slot-b"));
    assert_eq!(moved.get("room").and_then(|v| v.as_str()), Some("Lab 2"));
    assert_eq!(moved.get("isMoved").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn pure_addition_injects_one_standalone_makeup() {
    let workspace = temp_dir("planbook-exc-add");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, _template_id) = seed_monday_template(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.exceptions.set",
        json!({
            "exceptionDate": "2025-01-22",
            "kind": "added",
            "newTimeSlotId": "slot-b",
            "classId": class_id
        }),
    );

    let sessions = generate_window(&mut stdin, &mut reader, "2");
    let added: Vec<&serde_json::Value> = sessions
        .iter()
        .filter(|s| s.get("sessionDate").and_then(|v| v.as_str()) == Some("2025-01-22"))
        .collect();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].get("isMakeup").and_then(|v| v.as_bool()), Some(true));
    assert!(added[0].get("templateId").map(|v| v.is_null()).unwrap_or(false));
    // The four Monday occurrences are untouched.
    assert_eq!(sessions.len(), 5);
}

#[test]
fn duplicate_exception_for_same_template_and_date_is_replaced() {
    let workspace = temp_dir("planbook-exc-dup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (_class_id, template_id) = seed_monday_template(&mut stdin, &mut reader, &workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.exceptions.set",
        json!({
            "templateId": template_id,
            "exceptionDate": "2025-01-13",
            "kind": "moved",
            "newTimeSlotId": "slot-b"
        }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.exceptions.set",
        json!({
            "templateId": template_id,
            "exceptionDate": "2025-01-13",
            "kind": "cancelled"
        }),
    );
    // Same live record, rewritten in place.
    assert_eq!(
        first.get("exceptionId").and_then(|v| v.as_str()),
        second.get("exceptionId").and_then(|v| v.as_str())
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.exceptions.list",
        json!({ "templateId": template_id }),
    );
    let exceptions = listed
        .get("exceptions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(
        exceptions[0].get("kind").and_then(|v| v.as_str()),
        Some("cancelled")
    );

    // Last write wins: the date is now suppressed, not moved.
    let sessions = generate_window(&mut stdin, &mut reader, "4");
    assert!(sessions
        .iter()
        .all(|s| s.get("sessionDate").and_then(|v| v.as_str()) != Some("2025-01-13")));
}

#[test]
fn exception_validation_rejects_incomplete_records() {
    let workspace = temp_dir("planbook-exc-valid");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (_class_id, template_id) = seed_monday_template(&mut stdin, &mut reader, &workspace);

    // moved without a target slot
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.exceptions.set",
        json!({ "templateId": template_id, "exceptionDate": "2025-01-13", "kind": "moved" }),
    );
    assert_eq!(code, "bad_params");

    // added without a class
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.exceptions.set",
        json!({ "exceptionDate": "2025-01-22", "kind": "added", "newTimeSlotId": "slot-b" }),
    );
    assert_eq!(code, "bad_params");

    // cancellation against a template that does not exist
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.exceptions.set",
        json!({ "templateId": "tpl-ghost", "exceptionDate": "2025-01-13", "kind": "cancelled" }),
    );
    assert_eq!(code, "not_found");
}
