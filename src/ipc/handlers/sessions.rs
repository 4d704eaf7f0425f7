use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_iso_date, parse_opt_string, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, BatchReport, CourseSession, SessionException, WeeklyTemplate};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn load_templates(conn: &Connection) -> Result<Vec<WeeklyTemplate>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, teacher_id, school_year, day_of_week, time_slot_id, class_id, subject_id, is_active
         FROM weekly_templates
         ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(WeeklyTemplate {
            id: row.get(0)?,
            teacher_id: row.get(1)?,
            school_year: row.get(2)?,
            day_of_week: row.get::<_, i64>(3)?.max(0) as u32,
            time_slot_id: row.get(4)?,
            class_id: row.get(5)?,
            subject_id: row.get(6)?,
            is_active: row.get::<_, i64>(7)? != 0,
        })
    })?;
    rows.collect()
}

fn load_exceptions(
    conn: &Connection,
) -> Result<(Vec<SessionException>, Vec<String>), rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, template_id, exception_date, kind, new_time_slot_id, new_room, class_id, subject_id, reason
         FROM session_exceptions
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        let raw_date: String = row.get(2)?;
        Ok((
            SessionException {
                id: row.get(0)?,
                template_id: row.get(1)?,
                exception_date: NaiveDate::default(),
                kind: row.get(3)?,
                new_time_slot_id: row.get(4)?,
                new_room: row.get(5)?,
                class_id: row.get(6)?,
                subject_id: row.get(7)?,
                reason: row.get(8)?,
            },
            raw_date,
        ))
    })?;
    let mut out = Vec::new();
    let mut warnings = Vec::new();
    for item in rows {
        let (mut exc, raw_date) = item?;
        // Rows with an unparseable date are unusable; skip them but tell the
        // caller rather than poisoning the whole generation.
        match parse_iso_date(&raw_date) {
            Some(date) => {
                exc.exception_date = date;
                out.push(exc);
            }
            None => warnings.push(format!(
                "exception {} has unparseable date {:?}; skipped",
                exc.id, raw_date
            )),
        }
    }
    Ok((out, warnings))
}

/// Reference day for status defaulting. Tests pass an explicit `today`;
/// interactive callers get the local wall-clock date.
fn reference_day(req: &Request) -> Result<NaiveDate, serde_json::Value> {
    match req.params.get("today").and_then(|v| v.as_str()) {
        Some(raw) => parse_iso_date(raw)
            .ok_or_else(|| err(&req.id, "bad_params", "today must be YYYY-MM-DD", None)),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

/// Clamp the requested window to the configured school year, when one is set.
/// Returns None when nothing of the window falls inside the year.
fn clamp_to_school_year(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> (Option<(NaiveDate, NaiveDate)>, bool) {
    let Ok(Some(cfg)) = db::settings_get_json(conn, "setup.schoolYear") else {
        return (Some((start, end)), false);
    };
    let year_start = cfg
        .get("startDate")
        .and_then(|v| v.as_str())
        .and_then(parse_iso_date);
    let year_end = cfg
        .get("endDate")
        .and_then(|v| v.as_str())
        .and_then(parse_iso_date);
    let start = year_start.map_or(start, |ys| start.max(ys));
    let end = year_end.map_or(end, |ye| end.min(ye));
    if start > end {
        (None, true)
    } else {
        (Some((start, end)), true)
    }
}

fn generate_for_window(
    conn: &Connection,
    req: &Request,
) -> Result<schedule::GenerationOutcome, serde_json::Value> {
    let start = required_date(req, "startDate")?;
    let end = required_date(req, "endDate")?;
    if start > end {
        return Err(err(
            &req.id,
            "bad_params",
            "startDate must be on or before endDate",
            None,
        ));
    }
    let today = reference_day(req)?;

    let (window, _clamped) = clamp_to_school_year(conn, start, end);
    let Some((start, end)) = window else {
        return Ok(schedule::GenerationOutcome {
            sessions: Vec::new(),
            warnings: vec!["requested window falls outside the configured school year".to_string()],
        });
    };

    let templates = load_templates(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let (exceptions, load_warnings) = load_exceptions(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let mut outcome = schedule::generate_sessions(&templates, &exceptions, start, end, today)
        .map_err(|e| err(&req.id, &e.code, e.message, None))?;
    outcome.warnings.splice(0..0, load_warnings);
    Ok(outcome)
}

fn handle_sessions_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let outcome = match generate_for_window(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sessions = match serde_json::to_value(&outcome.sessions) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({ "sessions": sessions, "warnings": outcome.warnings }),
    )
}

/// Persist a generated window. Every insert is attempted independently:
/// a failing row is recorded and the batch carries on, so callers get
/// partial results plus per-row messages instead of a first-error abort.
/// Sessions already present from a prior run count as successes.
fn handle_sessions_bulk_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let outcome = match generate_for_window(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ts = now_ts();
    let mut report = BatchReport {
        total: outcome.sessions.len(),
        ..BatchReport::default()
    };
    for session in &outcome.sessions {
        let res = conn.execute(
            "INSERT INTO course_sessions(id, template_id, class_id, subject_id, time_slot_id, session_date, status, is_makeup, is_moved, room, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
            (
                &session.id,
                &session.template_id,
                &session.class_id,
                &session.subject_id,
                &session.time_slot_id,
                session.session_date.format("%Y-%m-%d").to_string(),
                &session.status,
                session.is_makeup as i64,
                session.is_moved as i64,
                &session.room,
                &ts,
                &ts,
            ),
        );
        match res {
            Ok(_) => report.successful += 1,
            Err(e) => {
                report.failed += 1;
                report
                    .errors
                    .push(format!("session {} on {}: {}", session.id, session.session_date, e));
            }
        }
    }

    ok(
        &req.id,
        json!({
            "successful": report.successful,
            "failed": report.failed,
            "total": report.total,
            "errors": report.errors,
            "warnings": outcome.warnings
        }),
    )
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<(CourseSession, String, Option<String>)> {
    let raw_date: String = row.get(5)?;
    let raw_original: Option<String> = row.get(13)?;
    let session = CourseSession {
        id: row.get(0)?,
        template_id: row.get(1)?,
        class_id: row.get(2)?,
        subject_id: row.get(3)?,
        time_slot_id: row.get(4)?,
        session_date: NaiveDate::default(),
        status: row.get(6)?,
        is_makeup: row.get::<_, i64>(7)? != 0,
        is_moved: row.get::<_, i64>(8)? != 0,
        room: row.get(9)?,
        objectives: row.get(10)?,
        content: row.get(11)?,
        notes: row.get(12)?,
        original_date: None,
        original_time_slot_id: row.get(14)?,
        moved_from: row.get(15)?,
    };
    Ok((session, raw_date, raw_original))
}

const SESSION_COLUMNS: &str = "id, template_id, class_id, subject_id, time_slot_id, session_date, status, is_makeup, is_moved, room, objectives, content, notes, original_date, original_time_slot_id, moved_from";

fn load_session(
    conn: &Connection,
    req: &Request,
    session_id: &str,
) -> Result<CourseSession, serde_json::Value> {
    let sql = format!(
        "SELECT {} FROM course_sessions WHERE id = ?",
        SESSION_COLUMNS
    );
    let found = conn
        .query_row(&sql, [session_id], row_to_session)
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some((mut session, raw_date, raw_original)) = found else {
        return Err(err(&req.id, "not_found", "session not found", None));
    };
    let Some(date) = parse_iso_date(&raw_date) else {
        return Err(err(
            &req.id,
            "db_query_failed",
            format!("session {} has unparseable date {}", session_id, raw_date),
            None,
        ));
    };
    session.session_date = date;
    session.original_date = raw_original.as_deref().and_then(parse_iso_date);
    Ok(session)
}

fn store_session(
    conn: &Connection,
    req: &Request,
    session: &CourseSession,
) -> Result<(), serde_json::Value> {
    conn.execute(
        "UPDATE course_sessions SET
            session_date = ?, time_slot_id = ?, status = ?, is_moved = ?, notes = ?,
            original_date = ?, original_time_slot_id = ?, moved_from = ?, updated_at = ?
         WHERE id = ?",
        (
            session.session_date.format("%Y-%m-%d").to_string(),
            &session.time_slot_id,
            &session.status,
            session.is_moved as i64,
            &session.notes,
            session
                .original_date
                .map(|d| d.format("%Y-%m-%d").to_string()),
            &session.original_time_slot_id,
            &session.moved_from,
            now_ts(),
            &session.id,
        ),
    )
    .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    Ok(())
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sessions": [] }));
    };
    let class_filter = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let start = req
        .params
        .get("startDate")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let end = req
        .params
        .get("endDate")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut sql = format!(
        "SELECT {} FROM course_sessions WHERE 1=1",
        SESSION_COLUMNS
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(cid) = class_filter {
        sql.push_str(" AND class_id = ?");
        binds.push(cid);
    }
    if let Some(s) = start {
        sql.push_str(" AND session_date >= ?");
        binds.push(s);
    }
    if let Some(e) = end {
        sql.push_str(" AND session_date <= ?");
        binds.push(e);
    }
    sql.push_str(" ORDER BY session_date, class_id, id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), row_to_session)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut sessions = Vec::with_capacity(rows.len());
    for (mut session, raw_date, raw_original) in rows {
        let Some(date) = parse_iso_date(&raw_date) else {
            continue;
        };
        session.session_date = date;
        session.original_date = raw_original.as_deref().and_then(parse_iso_date);
        match serde_json::to_value(&session) {
            Ok(v) => sessions.push(v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, json!({ "sessions": sessions }))
}

fn handle_sessions_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let new_date = match required_date(req, "newDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let new_slot = match required_str(req, "newTimeSlotId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut session = match load_session(conn, req, &session_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    schedule::move_session(&mut session, new_date, &new_slot);
    if let Err(e) = store_session(conn, req, &session) {
        return e;
    }
    match serde_json::to_value(&session) {
        Ok(v) => ok(&req.id, json!({ "session": v })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_sessions_undo_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut session = match load_session(conn, req, &session_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(e) = schedule::undo_move(&mut session) {
        return err(&req.id, &e.code, e.message, None);
    }
    if let Err(e) = store_session(conn, req, &session) {
        return e;
    }
    match serde_json::to_value(&session) {
        Ok(v) => ok(&req.id, json!({ "session": v })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_sessions_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let reason = match parse_opt_string(req.params.get("reason")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("reason {}", m), None),
    };
    let mut session = match load_session(conn, req, &session_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    schedule::cancel_session(&mut session, reason.as_deref());
    if let Err(e) = store_session(conn, req, &session) {
        return e;
    }
    match serde_json::to_value(&session) {
        Ok(v) => ok(&req.id, json!({ "session": v })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_sessions_conflict(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let time_slot_id = match required_str(req, "timeSlotId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exclude = match parse_opt_string(req.params.get("excludeSessionId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("excludeSessionId {}", m), None),
    };

    let sql = format!(
        "SELECT {} FROM course_sessions WHERE session_date = ? ORDER BY id",
        SESSION_COLUMNS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let date_str = date.format("%Y-%m-%d").to_string();
    let rows = stmt
        .query_map([&date_str], row_to_session)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut sessions = Vec::with_capacity(rows.len());
    for (mut session, raw_date, raw_original) in rows {
        let Some(d) = parse_iso_date(&raw_date) else {
            continue;
        };
        session.session_date = d;
        session.original_date = raw_original.as_deref().and_then(parse_iso_date);
        sessions.push(session);
    }

    let hit = schedule::find_conflict(&sessions, date, &time_slot_id, &class_id, exclude.as_deref());
    match hit {
        Some(session) => match serde_json::to_value(session) {
            Ok(v) => ok(&req.id, json!({ "conflict": v })),
            Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        },
        None => ok(&req.id, json!({ "conflict": null })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.generate" => Some(handle_sessions_generate(state, req)),
        "sessions.bulkCreate" => Some(handle_sessions_bulk_create(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.move" => Some(handle_sessions_move(state, req)),
        "sessions.undoMove" => Some(handle_sessions_undo_move(state, req)),
        "sessions.cancel" => Some(handle_sessions_cancel(state, req)),
        "sessions.conflict" => Some(handle_sessions_conflict(state, req)),
        _ => None,
    }
}
