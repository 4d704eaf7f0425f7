use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_iso_date, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// School year bounds clamp every generation window, so a template can never
/// produce sessions outside its year no matter what range the UI asks for.
fn handle_school_year_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let start = match required_str(req, "startDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end = match required_str(req, "endDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (Some(start_date), Some(end_date)) = (parse_iso_date(&start), parse_iso_date(&end)) else {
        return err(&req.id, "bad_params", "dates must be YYYY-MM-DD", None);
    };
    if start_date > end_date {
        return err(&req.id, "bad_params", "startDate must be on or before endDate", None);
    }

    let value = json!({ "startDate": start, "endDate": end });
    match db::settings_set_json(conn, "setup.schoolYear", &value) {
        Ok(()) => ok(&req.id, json!({ "schoolYear": value })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_school_year_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match db::settings_get_json(conn, "setup.schoolYear") {
        Ok(Some(value)) => ok(&req.id, json!({ "schoolYear": value })),
        Ok(None) => ok(&req.id, json!({ "schoolYear": null })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.schoolYear.set" => Some(handle_school_year_set(state, req)),
        "setup.schoolYear.get" => Some(handle_school_year_get(state, req)),
        _ => None,
    }
}
