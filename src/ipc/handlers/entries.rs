use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::conflict::{self, GateConflict};
use crate::schedule::validate;
use crate::schedule::EngineError;
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

struct HandlerErr {
    code: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, &self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            details: e.details,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

/// The full coordinates of a manual entry; update takes the same shape as
/// add rather than a field patch.
struct EntryPayload {
    class_id: String,
    course_id: String,
    lecturer_id: String,
    day_id: String,
    slot_id: String,
    room_id: String,
    division_label: String,
    semester: String,
    academic_year: String,
    session: String,
}

fn parse_payload(params: &serde_json::Value) -> Result<EntryPayload, HandlerErr> {
    Ok(EntryPayload {
        class_id: get_required_str(params, "classId")?,
        course_id: get_required_str(params, "courseId")?,
        lecturer_id: get_required_str(params, "lecturerId")?,
        day_id: get_required_str(params, "dayId")?,
        slot_id: get_required_str(params, "slotId")?,
        room_id: get_required_str(params, "roomId")?,
        division_label: get_optional_str(params, "divisionLabel").unwrap_or_default(),
        semester: get_required_str(params, "semester")?,
        academic_year: get_required_str(params, "academicYear")?,
        session: get_required_str(params, "session")?,
    })
}

fn ensure_reference_rows(conn: &Connection, p: &EntryPayload) -> Result<(), HandlerErr> {
    for (table, id, what) in [
        ("classes", &p.class_id, "class"),
        ("courses", &p.course_id, "course"),
        ("lecturers", &p.lecturer_id, "lecturer"),
        ("days", &p.day_id, "day"),
        ("time_slots", &p.slot_id, "slot"),
        ("rooms", &p.room_id, "room"),
    ] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        let found: Option<i64> = conn
            .query_row(&sql, [id.as_str()], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        if found.is_none() {
            return Err(HandlerErr::new("not_found", format!("{} not found", what)));
        }
    }
    Ok(())
}

fn slot_conflict(hit: GateConflict) -> HandlerErr {
    HandlerErr {
        code: "slot_conflict".to_string(),
        message: "slot already occupied".to_string(),
        details: Some(json!({
            "dimensions": hit.dimensions,
            "entryId": hit.entry_id,
        })),
    }
}

/// A uniqueness hit on the write is a conflict the session-scoped probe
/// could not see (other session or other academic year); same error shape.
fn map_write_constraint(e: rusqlite::Error, fallback: &str) -> HandlerErr {
    match e {
        rusqlite::Error::SqliteFailure(f, msg)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr {
                code: "slot_conflict".to_string(),
                message: "slot already occupied".to_string(),
                details: Some(json!({ "constraint": msg })),
            }
        }
        other => HandlerErr::new(fallback, other.to_string()),
    }
}

/// Gate order: referenced rows, membership/eligibility/session checks,
/// combined conflict probe, break check, then a single transaction for the
/// entry and its co-teaching link. Nothing is written on any failure.
fn entries_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = parse_payload(params)?;
    ensure_reference_rows(conn, &p)?;

    let links = validate::check_membership(
        conn,
        &p.class_id,
        &p.course_id,
        &p.lecturer_id,
        &p.semester,
        &p.session,
    )?;

    if let Some(hit) = conflict::gate_conflict(
        conn,
        &p.semester,
        &p.session,
        &p.class_id,
        &p.room_id,
        &p.lecturer_id,
        &p.day_id,
        &p.slot_id,
        None,
    )? {
        return Err(slot_conflict(hit));
    }
    if conflict::slot_is_break(conn, &p.slot_id)? {
        return Err(HandlerErr::new("break_slot", "slot is a break period"));
    }

    let entry_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Err(e) = tx.execute(
        "INSERT INTO timetable_entries(
            id, class_course_id, lecturer_course_id, class_id, course_id,
            lecturer_id, day_id, slot_id, room_id, division_label,
            semester, academic_year, confirmed, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        params![
            entry_id,
            links.class_course_id,
            links.lecturer_course_id,
            p.class_id,
            p.course_id,
            p.lecturer_id,
            p.day_id,
            p.slot_id,
            p.room_id,
            p.division_label,
            p.semester,
            p.academic_year,
            now_ts(),
        ],
    ) {
        let _ = tx.rollback();
        return Err(map_write_constraint(e, "db_insert_failed"));
    }
    if let Err(e) = tx.execute(
        "INSERT INTO entry_lecturers(id, entry_id, lecturer_id) VALUES(?, ?, ?)",
        (Uuid::new_v4().to_string(), &entry_id, &p.lecturer_id),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_insert_failed", e.to_string()));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "entryId": entry_id, "confirmed": false }))
}

fn entries_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT confirmed, lecturer_id FROM timetable_entries WHERE id = ?",
            [&entry_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((was_confirmed, old_lecturer_id)) = existing else {
        return Err(HandlerErr::new("not_found", "entry not found"));
    };

    let p = parse_payload(params)?;
    let confirmed = match params.get("confirmed") {
        None => was_confirmed != 0,
        Some(serde_json::Value::Bool(b)) => {
            // Pending -> Confirmed is one-way.
            if was_confirmed != 0 && !b {
                return Err(HandlerErr::new("bad_params", "confirmed cannot be reverted"));
            }
            *b
        }
        Some(_) => return Err(HandlerErr::new("bad_params", "confirmed must be boolean")),
    };

    ensure_reference_rows(conn, &p)?;
    let links = validate::check_membership(
        conn,
        &p.class_id,
        &p.course_id,
        &p.lecturer_id,
        &p.semester,
        &p.session,
    )?;

    // Excluding the entry itself means a confirmed-only flip can never
    // collide with the row it is updating.
    if let Some(hit) = conflict::gate_conflict(
        conn,
        &p.semester,
        &p.session,
        &p.class_id,
        &p.room_id,
        &p.lecturer_id,
        &p.day_id,
        &p.slot_id,
        Some(entry_id.as_str()),
    )? {
        return Err(slot_conflict(hit));
    }
    if conflict::slot_is_break(conn, &p.slot_id)? {
        return Err(HandlerErr::new("break_slot", "slot is a break period"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Err(e) = tx.execute(
        "UPDATE timetable_entries SET
            class_course_id = ?, lecturer_course_id = ?, class_id = ?,
            course_id = ?, lecturer_id = ?, day_id = ?, slot_id = ?,
            room_id = ?, division_label = ?, semester = ?, academic_year = ?,
            confirmed = ?
         WHERE id = ?",
        params![
            links.class_course_id,
            links.lecturer_course_id,
            p.class_id,
            p.course_id,
            p.lecturer_id,
            p.day_id,
            p.slot_id,
            p.room_id,
            p.division_label,
            p.semester,
            p.academic_year,
            confirmed as i64,
            entry_id,
        ],
    ) {
        let _ = tx.rollback();
        return Err(map_write_constraint(e, "db_update_failed"));
    }
    // Move the primary co-teaching link; extra co-lecturer rows stay.
    if old_lecturer_id != p.lecturer_id {
        if let Err(e) = tx.execute(
            "DELETE FROM entry_lecturers WHERE entry_id = ? AND lecturer_id = ?",
            (&entry_id, &old_lecturer_id),
        ) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_delete_failed", e.to_string()));
        }
        if let Err(e) = tx.execute(
            "INSERT OR IGNORE INTO entry_lecturers(id, entry_id, lecturer_id) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), &entry_id, &p.lecturer_id),
        ) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_insert_failed", e.to_string()));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "entryId": entry_id, "confirmed": confirmed }))
}

fn entries_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM timetable_entries WHERE id = ?",
            [&entry_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", "entry not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    // Dependency order, no cascade.
    if let Err(e) = tx.execute("DELETE FROM entry_lecturers WHERE entry_id = ?", [&entry_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
    }
    if let Err(e) = tx.execute("DELETE FROM timetable_entries WHERE id = ?", [&entry_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_delete_failed", e.to_string()));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

fn entries_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT e.id, e.class_id, c.name, e.course_id, co.code, co.name,
                e.lecturer_id, l.name, e.day_id, d.name,
                e.slot_id, ts.start_time, ts.end_time, e.room_id, r.name,
                e.division_label, e.semester, e.academic_year, e.confirmed,
                (SELECT GROUP_CONCAT(el.lecturer_id) FROM entry_lecturers el
                 WHERE el.entry_id = e.id)
         FROM timetable_entries e
         JOIN classes c ON c.id = e.class_id
         JOIN courses co ON co.id = e.course_id
         JOIN lecturers l ON l.id = e.lecturer_id
         JOIN days d ON d.id = e.day_id
         JOIN time_slots ts ON ts.id = e.slot_id
         JOIN rooms r ON r.id = e.room_id
         WHERE 1=1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(semester) = get_optional_str(params, "semester") {
        sql.push_str(" AND e.semester = ?");
        binds.push(Value::Text(semester));
    }
    if let Some(year) = get_optional_str(params, "academicYear") {
        sql.push_str(" AND e.academic_year = ?");
        binds.push(Value::Text(year));
    }
    if let Some(stream_id) = get_optional_str(params, "streamId") {
        sql.push_str(" AND c.stream_id = ?");
        binds.push(Value::Text(stream_id));
    }
    if let Some(class_id) = get_optional_str(params, "classId") {
        sql.push_str(" AND e.class_id = ?");
        binds.push(Value::Text(class_id));
    }
    sql.push_str(" ORDER BY d.day_order, ts.start_time, c.name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let entries = stmt
        .query_map(params_from_iter(binds), |r| {
            let division: String = r.get(15)?;
            let co_lecturers: Option<String> = r.get(19)?;
            let co_lecturer_ids: Vec<String> = co_lecturers
                .map(|s| s.split(',').map(|id| id.to_string()).collect())
                .unwrap_or_default();
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classId": r.get::<_, String>(1)?,
                "className": r.get::<_, String>(2)?,
                "courseId": r.get::<_, String>(3)?,
                "courseCode": r.get::<_, String>(4)?,
                "courseName": r.get::<_, String>(5)?,
                "lecturerId": r.get::<_, String>(6)?,
                "lecturerName": r.get::<_, String>(7)?,
                "dayId": r.get::<_, String>(8)?,
                "dayName": r.get::<_, String>(9)?,
                "slotId": r.get::<_, String>(10)?,
                "startTime": r.get::<_, String>(11)?,
                "endTime": r.get::<_, String>(12)?,
                "roomId": r.get::<_, String>(13)?,
                "roomName": r.get::<_, String>(14)?,
                "divisionLabel": if division.is_empty() { None } else { Some(division) },
                "semester": r.get::<_, String>(16)?,
                "academicYear": r.get::<_, String>(17)?,
                "confirmed": r.get::<_, i64>(18)? != 0,
                "coLecturerIds": co_lecturer_ids,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "entries": entries }))
}

fn handle_entries_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match entries_add(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_entries_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match entries_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_entries_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match entries_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_entries_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match entries_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "entries.add" => Some(handle_entries_add(state, req)),
        "entries.update" => Some(handle_entries_update(state, req)),
        "entries.delete" => Some(handle_entries_delete(state, req)),
        "entries.list" => Some(handle_entries_list(state, req)),
        _ => None,
    }
}
