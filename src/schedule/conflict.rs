use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use super::EngineError;

/// One administration period; every generator conflict probe is bounded
/// to it so past terms' timetables stay out of the way.
#[derive(Debug, Clone, Copy)]
pub struct TermScope<'a> {
    pub semester: &'a str,
    pub academic_year: &'a str,
}

pub fn room_taken(
    conn: &Connection,
    scope: TermScope,
    room_id: &str,
    day_id: &str,
    slot_id: &str,
) -> Result<bool, EngineError> {
    conn.query_row(
        "SELECT 1 FROM timetable_entries
         WHERE academic_year = ? AND semester = ?
           AND room_id = ? AND day_id = ? AND slot_id = ?",
        (scope.academic_year, scope.semester, room_id, day_id, slot_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| EngineError::new("db_query_failed", e.to_string()))
}

/// Division aware: the label must match exactly, with `''` standing for an
/// undivided class.
pub fn class_taken(
    conn: &Connection,
    scope: TermScope,
    class_id: &str,
    division_label: &str,
    day_id: &str,
    slot_id: &str,
) -> Result<bool, EngineError> {
    conn.query_row(
        "SELECT 1 FROM timetable_entries
         WHERE academic_year = ? AND semester = ?
           AND class_id = ? AND division_label = ? AND day_id = ? AND slot_id = ?",
        (
            scope.academic_year,
            scope.semester,
            class_id,
            division_label,
            day_id,
            slot_id,
        ),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| EngineError::new("db_query_failed", e.to_string()))
}

/// A lecturer is busy regardless of which room or course holds them.
pub fn lecturer_taken(
    conn: &Connection,
    scope: TermScope,
    lecturer_id: &str,
    day_id: &str,
    slot_id: &str,
) -> Result<bool, EngineError> {
    conn.query_row(
        "SELECT 1 FROM timetable_entries
         WHERE academic_year = ? AND semester = ?
           AND lecturer_id = ? AND day_id = ? AND slot_id = ?",
        (scope.academic_year, scope.semester, lecturer_id, day_id, slot_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| EngineError::new("db_query_failed", e.to_string()))
}

/// First free division label at (day, slot), scanning in index order.
/// `labels` is `[""]` for an undivided class, so the same scan covers both
/// shapes.
pub fn first_free_division(
    conn: &Connection,
    scope: TermScope,
    class_id: &str,
    labels: &[String],
    day_id: &str,
    slot_id: &str,
) -> Result<Option<String>, EngineError> {
    for label in labels {
        if !class_taken(conn, scope, class_id, label, day_id, slot_id)? {
            return Ok(Some(label.clone()));
        }
    }
    Ok(None)
}

pub fn slot_is_break(conn: &Connection, slot_id: &str) -> Result<bool, EngineError> {
    conn.query_row(
        "SELECT is_break FROM time_slots WHERE id = ?",
        [slot_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.map(|b| b != 0).unwrap_or(false))
    .map_err(|e| EngineError::new("db_query_failed", e.to_string()))
}

/// An existing entry blocking a manual edit, with the dimensions it shares
/// with the candidate.
#[derive(Debug, Clone)]
pub struct GateConflict {
    pub entry_id: String,
    pub dimensions: Vec<&'static str>,
}

/// Manual-entry conflict rule: one combined probe over the entry's semester
/// and session (session via the class of each existing entry), matching the
/// class, the room, or the lecturer at (day, slot). Coarser than the
/// per-dimension generator checks and not division aware; the two policies
/// are kept separate on purpose.
pub fn gate_conflict(
    conn: &Connection,
    semester: &str,
    session: &str,
    class_id: &str,
    room_id: &str,
    lecturer_id: &str,
    day_id: &str,
    slot_id: &str,
    exclude_entry_id: Option<&str>,
) -> Result<Option<GateConflict>, EngineError> {
    let mut sql = String::from(
        "SELECT e.id, e.class_id, e.room_id, e.lecturer_id
         FROM timetable_entries e
         JOIN classes c ON c.id = e.class_id
         WHERE e.semester = ? AND c.session = ?
           AND e.day_id = ? AND e.slot_id = ?
           AND (e.class_id = ? OR e.room_id = ? OR e.lecturer_id = ?)",
    );
    let mut values: Vec<Value> = vec![
        Value::Text(semester.to_string()),
        Value::Text(session.to_string()),
        Value::Text(day_id.to_string()),
        Value::Text(slot_id.to_string()),
        Value::Text(class_id.to_string()),
        Value::Text(room_id.to_string()),
        Value::Text(lecturer_id.to_string()),
    ];
    if let Some(id) = exclude_entry_id {
        sql.push_str(" AND e.id <> ?");
        values.push(Value::Text(id.to_string()));
    }
    sql.push_str(" LIMIT 1");

    let hit = conn
        .query_row(&sql, params_from_iter(values), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;

    Ok(hit.map(|(entry_id, hit_class, hit_room, hit_lecturer)| {
        let mut dimensions = Vec::new();
        if hit_class == class_id {
            dimensions.push("class");
        }
        if hit_room == room_id {
            dimensions.push("room");
        }
        if hit_lecturer == lecturer_id {
            dimensions.push("lecturer");
        }
        GateConflict {
            entry_id,
            dimensions,
        }
    }))
}
