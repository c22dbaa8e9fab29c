use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("timetable.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates/migrates the workspace schema. Public so tests can run it
/// against in-memory connections.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS days(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            day_order INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS time_slots(
            id TEXT PRIMARY KEY,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            is_break INTEGER NOT NULL DEFAULT 0,
            is_mandatory INTEGER NOT NULL DEFAULT 0,
            UNIQUE(start_time, end_time)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            capacity INTEGER,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS streams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            period_start TEXT,
            period_end TEXT,
            break_start TEXT,
            break_end TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS stream_days(
            stream_id TEXT NOT NULL,
            day_id TEXT NOT NULL,
            PRIMARY KEY(stream_id, day_id),
            FOREIGN KEY(stream_id) REFERENCES streams(id),
            FOREIGN KEY(day_id) REFERENCES days(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS stream_slots(
            stream_id TEXT NOT NULL,
            slot_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(stream_id, slot_id),
            FOREIGN KEY(stream_id) REFERENCES streams(id),
            FOREIGN KEY(slot_id) REFERENCES time_slots(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            stream_id TEXT NOT NULL,
            session TEXT NOT NULL,
            enrollment INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(stream_id) REFERENCES streams(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_stream ON classes(stream_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            session TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lecturers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            session TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_courses(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            UNIQUE(class_id, course_id, semester),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_courses_class ON class_courses(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_courses_course ON class_courses(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lecturer_courses(
            id TEXT PRIMARY KEY,
            lecturer_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            UNIQUE(lecturer_id, course_id),
            FOREIGN KEY(lecturer_id) REFERENCES lecturers(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lecturer_courses_course ON lecturer_courses(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_entries(
            id TEXT PRIMARY KEY,
            class_course_id TEXT NOT NULL,
            lecturer_course_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            lecturer_id TEXT NOT NULL,
            day_id TEXT NOT NULL,
            slot_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            division_label TEXT NOT NULL DEFAULT '',
            semester TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            confirmed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(class_course_id) REFERENCES class_courses(id),
            FOREIGN KEY(lecturer_course_id) REFERENCES lecturer_courses(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(lecturer_id) REFERENCES lecturers(id),
            FOREIGN KEY(day_id) REFERENCES days(id),
            FOREIGN KEY(slot_id) REFERENCES time_slots(id),
            FOREIGN KEY(room_id) REFERENCES rooms(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entry_lecturers(
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL,
            lecturer_id TEXT NOT NULL,
            UNIQUE(entry_id, lecturer_id),
            FOREIGN KEY(entry_id) REFERENCES timetable_entries(id),
            FOREIGN KEY(lecturer_id) REFERENCES lecturers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entry_lecturers_entry ON entry_lecturers(entry_id)",
        [],
    )?;

    // Older workspaces stored entries keyed by bare class/course/lecturer ids
    // with no assignment/eligibility references. Collapse them to the
    // canonical shape before any index or engine code touches the table.
    ensure_entry_link_columns(conn)?;
    ensure_entry_division_label(conn)?;
    ensure_entry_created_at(conn)?;
    dedupe_conflicting_entries(conn)?;

    // Uniqueness is enforced by the store: a racing check-then-insert loses
    // here and is handled as an ordinary conflict by the callers.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_entries_room
         ON timetable_entries(academic_year, semester, room_id, day_id, slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_entries_lecturer
         ON timetable_entries(academic_year, semester, lecturer_id, day_id, slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_entries_class
         ON timetable_entries(academic_year, semester, class_id, division_label, day_id, slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_scope
         ON timetable_entries(academic_year, semester)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_class_day_slot
         ON timetable_entries(class_id, day_id, slot_id)",
        [],
    )?;

    Ok(())
}

fn ensure_entry_link_columns(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "timetable_entries", "class_course_id")? {
        return Ok(());
    }

    conn.execute(
        "ALTER TABLE timetable_entries ADD COLUMN class_course_id TEXT",
        [],
    )?;
    conn.execute(
        "ALTER TABLE timetable_entries ADD COLUMN lecturer_course_id TEXT",
        [],
    )?;

    // Backfill from the link tables; a legacy entry whose links were never
    // recorded implies the links existed, so insert them.
    let mut stmt = conn.prepare(
        "SELECT id, class_id, course_id, lecturer_id, semester
         FROM timetable_entries ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (entry_id, class_id, course_id, lecturer_id, semester) in rows {
        let cc_id = find_or_insert_class_course(conn, &class_id, &course_id, &semester)?;
        let lc_id = find_or_insert_lecturer_course(conn, &lecturer_id, &course_id)?;
        conn.execute(
            "UPDATE timetable_entries SET class_course_id = ?, lecturer_course_id = ? WHERE id = ?",
            (&cc_id, &lc_id, &entry_id),
        )?;
    }

    Ok(())
}

fn find_or_insert_class_course(
    conn: &Connection,
    class_id: &str,
    course_id: &str,
    semester: &str,
) -> anyhow::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM class_courses WHERE class_id = ? AND course_id = ? AND semester = ?",
            (class_id, course_id, semester),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_courses(id, class_id, course_id, semester, active)
         VALUES(?, ?, ?, ?, 1)",
        (&id, class_id, course_id, semester),
    )?;
    Ok(id)
}

fn find_or_insert_lecturer_course(
    conn: &Connection,
    lecturer_id: &str,
    course_id: &str,
) -> anyhow::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM lecturer_courses WHERE lecturer_id = ? AND course_id = ?",
            (lecturer_id, course_id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lecturer_courses(id, lecturer_id, course_id, active)
         VALUES(?, ?, ?, 1)",
        (&id, lecturer_id, course_id),
    )?;
    Ok(id)
}

fn ensure_entry_division_label(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "timetable_entries", "division_label")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE timetable_entries ADD COLUMN division_label TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

fn ensure_entry_created_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "timetable_entries", "created_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE timetable_entries ADD COLUMN created_at TEXT", [])?;
    Ok(())
}

/// Workspaces written before the unique indexes existed can hold
/// double-bookings; keep the oldest row of each conflicting group so index
/// creation cannot fail.
fn dedupe_conflicting_entries(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM timetable_entries WHERE rowid NOT IN (
           SELECT MIN(rowid) FROM timetable_entries
           GROUP BY academic_year, semester, room_id, day_id, slot_id
         )",
        [],
    )?;
    conn.execute(
        "DELETE FROM timetable_entries WHERE rowid NOT IN (
           SELECT MIN(rowid) FROM timetable_entries
           GROUP BY academic_year, semester, lecturer_id, day_id, slot_id
         )",
        [],
    )?;
    conn.execute(
        "DELETE FROM timetable_entries WHERE rowid NOT IN (
           SELECT MIN(rowid) FROM timetable_entries
           GROUP BY academic_year, semester, class_id, division_label, day_id, slot_id
         )",
        [],
    )?;
    // Co-teaching rows of dropped entries go with them.
    conn.execute(
        "DELETE FROM entry_lecturers
         WHERE entry_id NOT IN (SELECT id FROM timetable_entries)",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    // Malformed historical values must not block the workspace.
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &serde_json::to_string(value)?),
    )?;
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
