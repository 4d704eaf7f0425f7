use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const KIND_CANCELLED: &str = "cancelled";
pub const KIND_MOVED: &str = "moved";
pub const KIND_ADDED: &str = "added";

pub const STATUS_PLANNED: &str = "planned";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_DONE: &str = "done";
pub const STATUS_CANCELLED: &str = "cancelled";

pub fn validate_exception_kind(kind: &str) -> bool {
    matches!(kind, KIND_CANCELLED | KIND_MOVED | KIND_ADDED)
}

#[derive(Debug, Clone)]
pub struct WeeklyTemplate {
    pub id: String,
    pub teacher_id: String,
    pub school_year: String,
    /// 1 = Monday .. 7 = Sunday.
    pub day_of_week: u32,
    pub time_slot_id: String,
    pub class_id: String,
    pub subject_id: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct SessionException {
    pub id: String,
    /// None for pure additions (no backing template).
    pub template_id: Option<String>,
    pub exception_date: NaiveDate,
    pub kind: String,
    pub new_time_slot_id: Option<String>,
    pub new_room: Option<String>,
    /// Only meaningful for `added`: a standalone session needs its own class.
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
    pub reason: Option<String>,
}

/// A surviving (template, date) pair after exceptions, or an injected
/// standalone occurrence with no backing template.
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub source_id: String,
    pub template_id: Option<String>,
    pub date: NaiveDate,
    pub time_slot_id: String,
    pub class_id: String,
    pub subject_id: Option<String>,
    pub room: Option<String>,
    pub is_moved: bool,
    pub is_makeup: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSession {
    pub id: String,
    pub template_id: Option<String>,
    pub class_id: String,
    pub subject_id: Option<String>,
    pub time_slot_id: String,
    pub session_date: NaiveDate,
    pub status: String,
    pub is_makeup: bool,
    pub is_moved: bool,
    pub room: Option<String>,
    pub objectives: Option<String>,
    pub content: Option<String>,
    pub notes: Option<String>,
    pub original_date: Option<NaiveDate>,
    pub original_time_slot_id: Option<String>,
    /// Human-readable "was <date> @ <slot>" annotation kept for audit display.
    pub moved_from: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleError {
    pub code: String,
    pub message: String,
}

impl ScheduleError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub sessions: Vec<CourseSession>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

/// Stable composite identity for a regenerated session. Sessions are
/// recomputed per query, not stored, so the same (source, date) must always
/// map to the same id no matter what window the caller asked for. A source
/// can only occur once per calendar date, so the pair is already unique.
/// The 0x1f separator keeps distinct sources from colliding on concatenation.
pub fn session_identity(source_id: &str, date: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("ses-{}", &digest[..16])
}

/// Every calendar date in [range_start, range_end] falling on the template's
/// weekday. Inactive templates expand to nothing.
pub fn expand_template(
    template: &WeeklyTemplate,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> Result<Vec<NaiveDate>, ScheduleError> {
    if range_start > range_end {
        return Err(ScheduleError::new(
            "invalid_range",
            "startDate must be on or before endDate",
        ));
    }
    if !(1..=7).contains(&template.day_of_week) {
        return Err(ScheduleError::new(
            "bad_day_of_week",
            format!("dayOfWeek must be 1..7, got {}", template.day_of_week),
        ));
    }
    if !template.is_active {
        return Ok(Vec::new());
    }

    let start_dow = range_start.weekday().number_from_monday();
    let offset = (template.day_of_week + 7 - start_dow) % 7;
    let mut date = range_start + ChronoDuration::days(offset as i64);
    let mut out = Vec::new();
    while date <= range_end {
        out.push(date);
        date += ChronoDuration::days(7);
    }
    Ok(out)
}

/// Merge expanded occurrences with exceptions. Cancelled occurrences are
/// dropped (the recurrence does not happen, distinct from a materialized
/// session later being cancelled), moved ones keep their date but take the
/// exception's slot/room, and template-less `added` exceptions are injected
/// as standalone makeup occurrences.
///
/// Duplicate exceptions for the same (template, date) resolve last-write-wins
/// in input order, matching the store's upsert policy. Inconsistent records
/// are skipped and reported as warnings rather than aborting generation.
pub fn apply_exceptions(
    templates: &[WeeklyTemplate],
    expanded: &[(usize, NaiveDate)],
    exceptions: &[SessionException],
) -> (Vec<Occurrence>, Vec<String>) {
    let mut warnings = Vec::new();

    let known: HashMap<&str, ()> = templates.iter().map(|t| (t.id.as_str(), ())).collect();
    let mut by_key: HashMap<(&str, NaiveDate), &SessionException> = HashMap::new();
    for exc in exceptions {
        let Some(tid) = exc.template_id.as_deref() else {
            continue;
        };
        if !known.contains_key(tid) {
            warnings.push(format!(
                "exception {} references unknown template {}; skipped",
                exc.id, tid
            ));
            continue;
        }
        if exc.kind == KIND_ADDED {
            warnings.push(format!(
                "added exception {} carries templateId {}; skipped",
                exc.id, tid
            ));
            continue;
        }
        by_key.insert((tid, exc.exception_date), exc);
    }

    let mut out = Vec::new();
    for &(tpl_idx, date) in expanded {
        let template = &templates[tpl_idx];
        let mut occ = Occurrence {
            source_id: template.id.clone(),
            template_id: Some(template.id.clone()),
            date,
            time_slot_id: template.time_slot_id.clone(),
            class_id: template.class_id.clone(),
            subject_id: template.subject_id.clone(),
            room: None,
            is_moved: false,
            is_makeup: false,
        };
        match by_key.get(&(template.id.as_str(), date)) {
            Some(exc) if exc.kind == KIND_CANCELLED => continue,
            Some(exc) if exc.kind == KIND_MOVED => {
                match exc.new_time_slot_id.as_ref() {
                    Some(slot) => {
                        occ.time_slot_id = slot.clone();
                        occ.room = exc.new_room.clone();
                        occ.is_moved = true;
                    }
                    None => {
                        warnings.push(format!(
                            "moved exception {} has no newTimeSlotId; occurrence kept as-is",
                            exc.id
                        ));
                    }
                }
                out.push(occ);
            }
            _ => out.push(occ),
        }
    }

    for exc in exceptions {
        if exc.template_id.is_some() || exc.kind != KIND_ADDED {
            continue;
        }
        let (Some(slot), Some(class_id)) = (exc.new_time_slot_id.as_ref(), exc.class_id.as_ref())
        else {
            warnings.push(format!(
                "added exception {} is missing newTimeSlotId or classId; skipped",
                exc.id
            ));
            continue;
        };
        out.push(Occurrence {
            source_id: format!("exc:{}", exc.id),
            template_id: None,
            date: exc.exception_date,
            time_slot_id: slot.clone(),
            class_id: class_id.clone(),
            subject_id: exc.subject_id.clone(),
            room: exc.new_room.clone(),
            is_moved: false,
            is_makeup: true,
        });
    }

    // Stable order no matter how exceptions arrived.
    out.sort_by(|a, b| {
        (a.date, &a.class_id, &a.source_id).cmp(&(b.date, &b.class_id, &b.source_id))
    });
    (out, warnings)
}

/// Turn a surviving occurrence into a concrete session record. Pure and
/// repeatable: the same occurrence and reference day always yield the same
/// record, id included.
pub fn materialize(occ: &Occurrence, today: NaiveDate) -> CourseSession {
    let status = if occ.date > today {
        STATUS_PLANNED
    } else if occ.date < today {
        STATUS_DONE
    } else {
        STATUS_IN_PROGRESS
    };
    CourseSession {
        id: session_identity(&occ.source_id, occ.date),
        template_id: occ.template_id.clone(),
        class_id: occ.class_id.clone(),
        subject_id: occ.subject_id.clone(),
        time_slot_id: occ.time_slot_id.clone(),
        session_date: occ.date,
        status: status.to_string(),
        is_makeup: occ.is_makeup,
        is_moved: occ.is_moved,
        room: occ.room.clone(),
        objectives: None,
        content: None,
        notes: None,
        original_date: None,
        original_time_slot_id: None,
        moved_from: None,
    }
}

/// Full pipeline: expand every template over the window, apply exceptions,
/// materialize. Deterministic for identical inputs.
pub fn generate_sessions(
    templates: &[WeeklyTemplate],
    exceptions: &[SessionException],
    range_start: NaiveDate,
    range_end: NaiveDate,
    today: NaiveDate,
) -> Result<GenerationOutcome, ScheduleError> {
    let mut expanded: Vec<(usize, NaiveDate)> = Vec::new();
    for (idx, template) in templates.iter().enumerate() {
        let dates = expand_template(template, range_start, range_end)?;
        for date in dates {
            expanded.push((idx, date));
        }
    }
    let (occurrences, warnings) = apply_exceptions(templates, &expanded, exceptions);
    let sessions = occurrences.iter().map(|o| materialize(o, today)).collect();
    Ok(GenerationOutcome { sessions, warnings })
}

/// First session colliding with (date, slot, class), skipping cancelled
/// sessions and the one being moved. Class-scoped only: a teacher covering
/// two classes in one slot is not this detector's concern. Returns at most
/// one match; callers wanting every conflict filter the list themselves.
pub fn find_conflict<'a>(
    sessions: &'a [CourseSession],
    date: NaiveDate,
    time_slot_id: &str,
    class_id: &str,
    exclude_session_id: Option<&str>,
) -> Option<&'a CourseSession> {
    sessions.iter().find(|s| {
        s.session_date == date
            && s.time_slot_id == time_slot_id
            && s.class_id == class_id
            && s.status != STATUS_CANCELLED
            && exclude_session_id != Some(s.id.as_str())
    })
}

/// Reschedule one session. Conflict checking is advisory and belongs to the
/// caller; this records what was overwritten so the move can be undone.
/// Only the most recent move is undoable: a second move overwrites the
/// recorded original.
pub fn move_session(session: &mut CourseSession, new_date: NaiveDate, new_time_slot_id: &str) {
    session.moved_from = Some(format!(
        "was {} @ {}",
        session.session_date.format("%Y-%m-%d"),
        session.time_slot_id
    ));
    session.original_date = Some(session.session_date);
    session.original_time_slot_id = Some(session.time_slot_id.clone());
    session.session_date = new_date;
    session.time_slot_id = new_time_slot_id.to_string();
    session.is_moved = true;
}

pub fn undo_move(session: &mut CourseSession) -> Result<(), ScheduleError> {
    let (Some(date), Some(slot)) = (
        session.original_date,
        session.original_time_slot_id.clone(),
    ) else {
        return Err(ScheduleError::new(
            "nothing_to_undo",
            "session has no recorded move",
        ));
    };
    session.session_date = date;
    session.time_slot_id = slot;
    session.is_moved = false;
    session.original_date = None;
    session.original_time_slot_id = None;
    session.moved_from = None;
    Ok(())
}

/// Cancellation is a status transition, never a delete; attendance and
/// history keep resolving against the record.
pub fn cancel_session(session: &mut CourseSession, reason: Option<&str>) {
    session.status = STATUS_CANCELLED.to_string();
    if let Some(r) = reason.map(str::trim).filter(|r| !r.is_empty()) {
        session.notes = Some(match session.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{}\nCancelled: {}", existing, r),
            _ => format!("Cancelled: {}", r),
        });
    }
}
