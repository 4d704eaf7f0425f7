use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_string, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Upsert keyed on (templateId, exceptionDate): writing a second exception
/// for the same template and date replaces the first (last-write-wins).
/// Pure additions have no template and always insert a new row.
fn handle_exceptions_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let kind = match required_str(req, "kind") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !schedule::validate_exception_kind(&kind) {
        return err(
            &req.id,
            "bad_params",
            "kind must be one of: cancelled, moved, added",
            None,
        );
    }
    let exception_date = match required_date(req, "exceptionDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let template_id = match parse_opt_string(req.params.get("templateId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("templateId {}", m), None),
    };
    let new_time_slot_id = match parse_opt_string(req.params.get("newTimeSlotId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("newTimeSlotId {}", m), None),
    };
    let new_room = match parse_opt_string(req.params.get("newRoom")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("newRoom {}", m), None),
    };
    let class_id = match parse_opt_string(req.params.get("classId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("classId {}", m), None),
    };
    let subject_id = match parse_opt_string(req.params.get("subjectId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("subjectId {}", m), None),
    };
    let reason = match parse_opt_string(req.params.get("reason")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("reason {}", m), None),
    };
    let created_by = match parse_opt_string(req.params.get("createdBy")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("createdBy {}", m), None),
    };

    match kind.as_str() {
        schedule::KIND_ADDED => {
            if template_id.is_some() {
                return err(&req.id, "bad_params", "added exceptions must not carry a templateId", None);
            }
            if new_time_slot_id.is_none() || class_id.is_none() {
                return err(&req.id, "bad_params", "added exceptions need newTimeSlotId and classId", None);
            }
        }
        _ => {
            let Some(tid) = template_id.as_deref() else {
                return err(&req.id, "bad_params", format!("{} exceptions need a templateId", kind), None);
            };
            let found = conn
                .query_row("SELECT 1 FROM weekly_templates WHERE id = ?", [tid], |_r| Ok(()))
                .optional();
            match found {
                Ok(Some(())) => {}
                Ok(None) => return err(&req.id, "not_found", "template not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
            if kind == schedule::KIND_MOVED && new_time_slot_id.is_none() {
                return err(&req.id, "bad_params", "moved exceptions need newTimeSlotId", None);
            }
        }
    }

    let date_str = exception_date.format("%Y-%m-%d").to_string();
    let exception_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO session_exceptions(id, template_id, exception_date, kind, new_time_slot_id, new_room, class_id, subject_id, reason, created_by)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(template_id, exception_date) DO UPDATE SET
             kind = excluded.kind,
             new_time_slot_id = excluded.new_time_slot_id,
             new_room = excluded.new_room,
             class_id = excluded.class_id,
             subject_id = excluded.subject_id,
             reason = excluded.reason,
             created_by = excluded.created_by",
        (
            &exception_id,
            &template_id,
            &date_str,
            &kind,
            &new_time_slot_id,
            &new_room,
            &class_id,
            &subject_id,
            &reason,
            &created_by,
        ),
    );
    if let Err(e) = inserted {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "session_exceptions" })),
        );
    }

    // On a replaced row the original id survives; report whichever is live.
    let live_id = match template_id.as_deref() {
        Some(tid) => conn
            .query_row(
                "SELECT id FROM session_exceptions WHERE template_id = ? AND exception_date = ?",
                (tid, &date_str),
                |r| r.get::<_, String>(0),
            )
            .unwrap_or(exception_id),
        None => exception_id,
    };

    ok(&req.id, json!({ "exceptionId": live_id }))
}

fn handle_exceptions_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exception_id = match required_str(req, "exceptionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM session_exceptions WHERE id = ?", [&exception_id]) {
        Ok(0) => err(&req.id, "not_found", "exception not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_exceptions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "exceptions": [] }));
    };
    let template_filter = req
        .params
        .get("templateId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut sql = String::from(
        "SELECT id, template_id, exception_date, kind, new_time_slot_id, new_room, class_id, subject_id, reason
         FROM session_exceptions WHERE 1=1",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(tid) = template_filter {
        sql.push_str(" AND template_id = ?");
        binds.push(tid);
    }
    sql.push_str(" ORDER BY exception_date, id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "templateId": row.get::<_, Option<String>>(1)?,
                "exceptionDate": row.get::<_, String>(2)?,
                "kind": row.get::<_, String>(3)?,
                "newTimeSlotId": row.get::<_, Option<String>>(4)?,
                "newRoom": row.get::<_, Option<String>>(5)?,
                "classId": row.get::<_, Option<String>>(6)?,
                "subjectId": row.get::<_, Option<String>>(7)?,
                "reason": row.get::<_, Option<String>>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(exceptions) => ok(&req.id, json!({ "exceptions": exceptions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.exceptions.set" => Some(handle_exceptions_set(state, req)),
        "schedule.exceptions.remove" => Some(handle_exceptions_remove(state, req)),
        "schedule.exceptions.list" => Some(handle_exceptions_list(state, req)),
        _ => None,
    }
}
