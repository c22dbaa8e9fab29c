use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::calendar::parse_hhmm;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const WEEK: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

fn list_days(conn: &rusqlite::Connection) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, name, day_order, active FROM days ORDER BY day_order",
    )?;
    stmt.query_map([], |row| {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let day_order: i64 = row.get(2)?;
        let active: i64 = row.get(3)?;
        Ok(json!({
            "id": id,
            "name": name,
            "dayOrder": day_order,
            "active": active != 0
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

fn handle_days_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Idempotent by day name; re-seeding never duplicates or reorders.
    for (i, name) in WEEK.iter().enumerate() {
        if let Err(e) = conn.execute(
            "INSERT OR IGNORE INTO days(id, name, day_order, active) VALUES(?, ?, ?, 1)",
            (Uuid::new_v4().to_string(), name, (i + 1) as i64),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "days" })),
            );
        }
    }

    match list_days(conn) {
        Ok(days) => ok(&req.id, json!({ "days": days })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_days_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "days": [] }));
    };
    match list_days(conn) {
        Ok(days) => ok(&req.id, json!({ "days": days })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_days_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let day_id = match req.params.get("dayId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing dayId", None),
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "active must be boolean", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM days WHERE id = ?", [&day_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "day not found", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE days SET active = ? WHERE id = ?",
        (active as i64, &day_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_slots_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let start = match req.params.get("startTime").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing startTime", None),
    };
    let end = match req.params.get("endTime").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing endTime", None),
    };
    let (Some(start_min), Some(end_min)) = (parse_hhmm(&start), parse_hhmm(&end)) else {
        return err(&req.id, "bad_params", "times must be HH:MM", None);
    };
    if start_min >= end_min {
        return err(&req.id, "bad_params", "startTime must be before endTime", None);
    }
    let is_break = req
        .params
        .get("isBreak")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let is_mandatory = req
        .params
        .get("isMandatory")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let slot_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO time_slots(id, start_time, end_time, is_break, is_mandatory)
         VALUES(?, ?, ?, ?, ?)",
        (&slot_id, &start, &end, is_break as i64, is_mandatory as i64),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "time_slots" })),
        );
    }

    ok(
        &req.id,
        json!({
            "slotId": slot_id,
            "startTime": start,
            "endTime": end,
            "isBreak": is_break,
            "isMandatory": is_mandatory
        }),
    )
}

fn handle_slots_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "slots": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT id, start_time, end_time, is_break, is_mandatory
         FROM time_slots ORDER BY start_time, end_time",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let start: String = row.get(1)?;
            let end: String = row.get(2)?;
            let is_break: i64 = row.get(3)?;
            let is_mandatory: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "startTime": start,
                "endTime": end,
                "isBreak": is_break != 0,
                "isMandatory": is_mandatory != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(slots) => ok(&req.id, json!({ "slots": slots })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_rooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let capacity = req.params.get("capacity").and_then(|v| v.as_i64());
    if capacity.is_some_and(|c| c < 0) {
        return err(&req.id, "bad_params", "capacity must be >= 0", None);
    }

    let room_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO rooms(id, name, capacity, active) VALUES(?, ?, ?, 1)",
        (&room_id, &name, capacity),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "rooms" })),
        );
    }

    ok(&req.id, json!({ "roomId": room_id, "name": name }))
}

fn handle_rooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "rooms": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, capacity, active FROM rooms ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let capacity: Option<i64> = row.get(2)?;
            let active: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "capacity": capacity,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(rooms) => ok(&req.id, json!({ "rooms": rooms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "days.seed" => Some(handle_days_seed(state, req)),
        "days.list" => Some(handle_days_list(state, req)),
        "days.update" => Some(handle_days_update(state, req)),
        "slots.create" => Some(handle_slots_create(state, req)),
        "slots.list" => Some(handle_slots_list(state, req)),
        "rooms.create" => Some(handle_rooms_create(state, req)),
        "rooms.list" => Some(handle_rooms_list(state, req)),
        _ => None,
    }
}
