use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::calendar::{load_stream_calendar, parse_hhmm};
use crate::schedule::SchedulerConfig;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn stream_exists(conn: &Connection, stream_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM streams WHERE id = ?", [stream_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

/// Absent or null keys read as None; anything else must be a valid HH:MM.
fn optional_time(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| parse_hhmm(s).is_some());
            match s {
                Some(s) => Ok(Some(s)),
                None => Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be HH:MM", key),
                    None,
                )),
            }
        }
    }
}

fn id_list(req: &Request, key: &str) -> Result<Vec<String>, serde_json::Value> {
    let Some(arr) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an array", key),
            None,
        ));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        match v.as_str() {
            Some(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
            _ => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must contain ids", key),
                    None,
                ))
            }
        }
    }
    Ok(out)
}

fn handle_streams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let mut windows = Vec::with_capacity(4);
    for key in ["periodStart", "periodEnd", "breakStart", "breakEnd"] {
        match optional_time(req, key) {
            Ok(v) => windows.push(v),
            Err(resp) => return resp,
        }
    }

    let stream_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO streams(id, name, period_start, period_end, break_start, break_end)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &stream_id,
            &name,
            &windows[0],
            &windows[1],
            &windows[2],
            &windows[3],
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "streams" })),
        );
    }

    ok(&req.id, json!({ "streamId": stream_id, "name": name }))
}

fn handle_streams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "streams": [] }));
    };

    // Counts via correlated subqueries so joins cannot double-count.
    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.name,
           s.period_start, s.period_end, s.break_start, s.break_end,
           (SELECT COUNT(*) FROM stream_days sd WHERE sd.stream_id = s.id) AS day_count,
           (SELECT COUNT(*) FROM stream_slots ss WHERE ss.stream_id = s.id) AS slot_count,
           (SELECT COUNT(*) FROM classes c WHERE c.stream_id = s.id) AS class_count
         FROM streams s
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "periodStart": r.get::<_, Option<String>>(2)?,
                "periodEnd": r.get::<_, Option<String>>(3)?,
                "breakStart": r.get::<_, Option<String>>(4)?,
                "breakEnd": r.get::<_, Option<String>>(5)?,
                "dayCount": r.get::<_, i64>(6)?,
                "slotCount": r.get::<_, i64>(7)?,
                "classCount": r.get::<_, i64>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(streams) => ok(&req.id, json!({ "streams": streams })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_streams_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let stream_id = match req.params.get("streamId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing streamId", None),
    };
    match stream_exists(conn, &stream_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "stream not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    if let Some(v) = req.params.get("name") {
        let name = v.as_str().map(|s| s.trim().to_string()).unwrap_or_default();
        if name.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        sets.push("name = ?");
        binds.push(Value::Text(name));
    }
    // An explicit null clears the window; the stream then falls back to the
    // next calendar source.
    for (key, column) in [
        ("periodStart", "period_start = ?"),
        ("periodEnd", "period_end = ?"),
        ("breakStart", "break_start = ?"),
        ("breakEnd", "break_end = ?"),
    ] {
        if req.params.get(key).is_none() {
            continue;
        }
        match optional_time(req, key) {
            Ok(Some(t)) => {
                sets.push(column);
                binds.push(Value::Text(t));
            }
            Ok(None) => {
                sets.push(column);
                binds.push(Value::Null);
            }
            Err(resp) => return resp,
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "no fields to update", None);
    }

    let sql = format!("UPDATE streams SET {} WHERE id = ?", sets.join(", "));
    binds.push(Value::Text(stream_id));
    if let Err(e) = conn.execute(&sql, params_from_iter(binds)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_streams_set_days(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let stream_id = match req.params.get("streamId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing streamId", None),
    };
    let day_ids = match id_list(req, "dayIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match stream_exists(conn, &stream_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "stream not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    for day_id in &day_ids {
        let found: Option<i64> = match conn
            .query_row("SELECT 1 FROM days WHERE id = ?", [day_id], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if found.is_none() {
            return err(
                &req.id,
                "not_found",
                "day not found",
                Some(json!({ "dayId": day_id })),
            );
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM stream_days WHERE stream_id = ?", [&stream_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    for day_id in &day_ids {
        if let Err(e) = tx.execute(
            "INSERT OR IGNORE INTO stream_days(stream_id, day_id) VALUES(?, ?)",
            (&stream_id, day_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "stream_days" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "dayCount": day_ids.len() }))
}

fn handle_streams_set_slots(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let stream_id = match req.params.get("streamId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing streamId", None),
    };
    let slot_ids = match id_list(req, "slotIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match stream_exists(conn, &stream_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "stream not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    for slot_id in &slot_ids {
        let found: Option<i64> = match conn
            .query_row("SELECT 1 FROM time_slots WHERE id = ?", [slot_id], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if found.is_none() {
            return err(
                &req.id,
                "not_found",
                "slot not found",
                Some(json!({ "slotId": slot_id })),
            );
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM stream_slots WHERE stream_id = ?",
        [&stream_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    for (i, slot_id) in slot_ids.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT OR IGNORE INTO stream_slots(stream_id, slot_id, sort_order) VALUES(?, ?, ?)",
            (&stream_id, slot_id, i as i64),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "stream_slots" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "slotCount": slot_ids.len() }))
}

/// Read-only preview of the resolved calendar; synthesized windows are
/// shown but never written to `time_slots` from here.
fn handle_streams_calendar(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let stream_id = match req.params.get("streamId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing streamId", None),
    };

    let cfg = match SchedulerConfig::load(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };
    match load_stream_calendar(conn, &stream_id, &cfg) {
        Ok(cal) => match serde_json::to_value(&cal) {
            Ok(v) => ok(&req.id, v),
            Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "streams.create" => Some(handle_streams_create(state, req)),
        "streams.list" => Some(handle_streams_list(state, req)),
        "streams.update" => Some(handle_streams_update(state, req)),
        "streams.setDays" => Some(handle_streams_set_days(state, req)),
        "streams.setSlots" => Some(handle_streams_set_slots(state, req)),
        "streams.calendar" => Some(handle_streams_calendar(state, req)),
        _ => None,
    }
}
