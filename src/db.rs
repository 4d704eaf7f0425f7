use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("planbook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            short_code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS time_slots(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            is_break INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_time_slots_sort ON time_slots(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_templates(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            school_year TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            time_slot_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(time_slot_id) REFERENCES time_slots(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_templates_class ON weekly_templates(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_templates_year ON weekly_templates(school_year)",
        [],
    )?;

    // UNIQUE(template_id, exception_date) plus the upsert in the handler make
    // the duplicate-exception policy last-write-wins at the store level.
    // NULL template ids (pure additions) are distinct under UNIQUE, so any
    // number of additions coexist.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_exceptions(
            id TEXT PRIMARY KEY,
            template_id TEXT,
            exception_date TEXT NOT NULL,
            kind TEXT NOT NULL,
            new_time_slot_id TEXT,
            new_room TEXT,
            class_id TEXT,
            subject_id TEXT,
            reason TEXT,
            created_by TEXT,
            UNIQUE(template_id, exception_date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_exceptions_date ON session_exceptions(exception_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_sessions(
            id TEXT PRIMARY KEY,
            template_id TEXT,
            class_id TEXT NOT NULL,
            subject_id TEXT,
            time_slot_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            status TEXT NOT NULL,
            is_makeup INTEGER NOT NULL DEFAULT 0,
            is_moved INTEGER NOT NULL DEFAULT 0,
            room TEXT,
            objectives TEXT,
            content TEXT,
            notes TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_sessions_class ON course_sessions(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_sessions_date ON course_sessions(session_date)",
        [],
    )?;

    // Workspaces created before single-level undo existed lack the move
    // bookkeeping columns. Add them on open.
    ensure_course_sessions_move_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_course_sessions_move_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "course_sessions", "original_date")? {
        conn.execute(
            "ALTER TABLE course_sessions ADD COLUMN original_date TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "course_sessions", "original_time_slot_id")? {
        conn.execute(
            "ALTER TABLE course_sessions ADD COLUMN original_time_slot_id TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "course_sessions", "moved_from")? {
        conn.execute("ALTER TABLE course_sessions ADD COLUMN moved_from TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, text),
    )?;
    Ok(())
}
