use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_bool, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn slot_exists(conn: &rusqlite::Connection, slot_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM time_slots WHERE id = ?", [slot_id], |_r| {
        Ok(())
    })
    .optional()
    .map(|v| v.is_some())
}

fn class_exists(conn: &rusqlite::Connection, class_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |_r| Ok(()))
        .optional()
        .map(|v| v.is_some())
}

/// Replace the whole time-slot catalog. Slots are reference data the
/// scheduler never creates or destroys on its own, so the UI hands over the
/// full ordered list each time.
fn handle_slots_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(slots) = req.params.get("slots").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing slots array", None);
    };

    let mut parsed = Vec::with_capacity(slots.len());
    for (i, raw) in slots.iter().enumerate() {
        let label = match raw.get("label").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return err(&req.id, "bad_params", format!("slots[{}] missing label", i), None),
        };
        let start_time = match raw.get("startTime").and_then(|v| v.as_str()) {
            Some(s) => s.trim().to_string(),
            None => return err(&req.id, "bad_params", format!("slots[{}] missing startTime", i), None),
        };
        let end_time = match raw.get("endTime").and_then(|v| v.as_str()) {
            Some(s) => s.trim().to_string(),
            None => return err(&req.id, "bad_params", format!("slots[{}] missing endTime", i), None),
        };
        let duration = match raw.get("durationMinutes").and_then(|v| v.as_i64()) {
            Some(v) if v > 0 => v,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("slots[{}] durationMinutes must be a positive integer", i),
                    None,
                )
            }
        };
        let is_break = raw.get("isBreak").and_then(|v| v.as_bool()).unwrap_or(false);
        let sort_order = raw
            .get("sortOrder")
            .and_then(|v| v.as_i64())
            .unwrap_or(i as i64);
        let id = raw
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        parsed.push((id, label, start_time, end_time, duration, is_break, sort_order));
    }

    let result: Result<(), rusqlite::Error> = (|| {
        conn.execute_batch("BEGIN")?;
        conn.execute("DELETE FROM time_slots", [])?;
        for (id, label, start_time, end_time, duration, is_break, sort_order) in &parsed {
            conn.execute(
                "INSERT INTO time_slots(id, label, start_time, end_time, duration_minutes, is_break, sort_order)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (id, label, start_time, end_time, duration, *is_break as i64, sort_order),
            )?;
        }
        conn.execute_batch("COMMIT")?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = conn.execute_batch("ROLLBACK");
        return err(&req.id, "db_insert_failed", e.to_string(), Some(json!({ "table": "time_slots" })));
    }

    let ids: Vec<&str> = parsed.iter().map(|s| s.0.as_str()).collect();
    ok(&req.id, json!({ "slotIds": ids, "count": parsed.len() }))
}

fn handle_slots_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "slots": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT id, label, start_time, end_time, duration_minutes, is_break, sort_order
         FROM time_slots
         ORDER BY sort_order, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "label": row.get::<_, String>(1)?,
                "startTime": row.get::<_, String>(2)?,
                "endTime": row.get::<_, String>(3)?,
                "durationMinutes": row.get::<_, i64>(4)?,
                "isBreak": row.get::<_, i64>(5)? != 0,
                "sortOrder": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(slots) => ok(&req.id, json!({ "slots": slots })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_templates_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_year = match required_str(req, "schoolYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let time_slot_id = match required_str(req, "timeSlotId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let day_of_week = match req.params.get("dayOfWeek").and_then(|v| v.as_i64()) {
        Some(v) if (1..=7).contains(&v) => v,
        _ => return err(&req.id, "bad_params", "dayOfWeek must be 1 (Monday) .. 7 (Sunday)", None),
    };
    let subject_id = match parse_opt_string(req.params.get("subjectId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("subjectId {}", m), None),
    };
    let is_active = match parse_bool(req.params.get("isActive"), true) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("isActive {}", m), None),
    };

    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match slot_exists(conn, &time_slot_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "time slot not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let template_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO weekly_templates(id, teacher_id, school_year, day_of_week, time_slot_id, class_id, subject_id, is_active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &template_id,
            &teacher_id,
            &school_year,
            day_of_week,
            &time_slot_id,
            &class_id,
            &subject_id,
            is_active as i64,
            &ts,
            &ts,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "weekly_templates" })),
        );
    }

    ok(&req.id, json!({ "templateId": template_id }))
}

fn handle_templates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "templates": [] }));
    };
    let class_filter = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let include_inactive = match parse_bool(req.params.get("includeInactive"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeInactive {}", m), None),
    };

    let mut sql = String::from(
        "SELECT id, teacher_id, school_year, day_of_week, time_slot_id, class_id, subject_id, is_active
         FROM weekly_templates WHERE 1=1",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(cid) = class_filter {
        sql.push_str(" AND class_id = ?");
        binds.push(cid);
    }
    if !include_inactive {
        sql.push_str(" AND is_active = 1");
    }
    sql.push_str(" ORDER BY day_of_week, time_slot_id, id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "teacherId": row.get::<_, String>(1)?,
                "schoolYear": row.get::<_, String>(2)?,
                "dayOfWeek": row.get::<_, i64>(3)?,
                "timeSlotId": row.get::<_, String>(4)?,
                "classId": row.get::<_, String>(5)?,
                "subjectId": row.get::<_, Option<String>>(6)?,
                "isActive": row.get::<_, i64>(7)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(templates) => ok(&req.id, json!({ "templates": templates })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_templates_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let template_id = match required_str(req, "templateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let mut sets: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(v) = patch.get("dayOfWeek") {
        let Some(day) = v.as_i64().filter(|d| (1..=7).contains(d)) else {
            return err(&req.id, "bad_params", "patch.dayOfWeek must be 1..7", None);
        };
        sets.push("day_of_week = ?");
        binds.push(day.into());
    }
    if let Some(v) = patch.get("timeSlotId") {
        let Some(slot) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "patch.timeSlotId must be a string", None);
        };
        match slot_exists(conn, slot) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "time slot not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
        sets.push("time_slot_id = ?");
        binds.push(slot.to_string().into());
    }
    if let Some(v) = patch.get("subjectId") {
        match parse_opt_string(Some(v)) {
            Ok(Some(s)) => {
                sets.push("subject_id = ?");
                binds.push(s.into());
            }
            Ok(None) => sets.push("subject_id = NULL"),
            Err(m) => return err(&req.id, "bad_params", format!("patch.subjectId {}", m), None),
        }
    }
    if let Some(v) = patch.get("schoolYear") {
        let Some(year) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "patch.schoolYear must be a string", None);
        };
        sets.push("school_year = ?");
        binds.push(year.to_string().into());
    }
    if let Some(v) = patch.get("isActive") {
        let Some(active) = v.as_bool() else {
            return err(&req.id, "bad_params", "patch.isActive must be boolean", None);
        };
        sets.push("is_active = ?");
        binds.push((active as i64).into());
    }

    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }
    sets.push("updated_at = ?");
    binds.push(now_ts().into());
    binds.push(template_id.clone().into());

    let sql = format!(
        "UPDATE weekly_templates SET {} WHERE id = ?",
        sets.join(", ")
    );
    match conn.execute(&sql, rusqlite::params_from_iter(binds.iter())) {
        Ok(0) => err(&req.id, "not_found", "template not found", None),
        Ok(_) => ok(&req.id, json!({ "templateId": template_id, "updated": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_templates_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let template_id = match required_str(req, "templateId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM weekly_templates WHERE id = ?", [&template_id]) {
        Ok(0) => err(&req.id, "not_found", "template not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.slots.save" => Some(handle_slots_save(state, req)),
        "timetable.slots.list" => Some(handle_slots_list(state, req)),
        "timetable.templates.create" => Some(handle_templates_create(state, req)),
        "timetable.templates.list" => Some(handle_templates_list(state, req)),
        "timetable.templates.update" => Some(handle_templates_update(state, req)),
        "timetable.templates.delete" => Some(handle_templates_delete(state, req)),
        _ => None,
    }
}
