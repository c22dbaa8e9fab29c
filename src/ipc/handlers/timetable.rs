use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::generate::{self, GenerateTarget};
use crate::schedule::SchedulerConfig;

fn handle_timetable_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let semester = match req.params.get("semester").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim(),
        _ => return err(&req.id, "bad_params", "missing semester", None),
    };
    let academic_year = match req.params.get("academicYear").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim(),
        _ => return err(&req.id, "bad_params", "missing academicYear", None),
    };
    let stream_id = req
        .params
        .get("streamId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty());
    let seed = req.params.get("seed").and_then(|v| v.as_u64());

    let cfg = match SchedulerConfig::load(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };
    let target = GenerateTarget {
        semester,
        academic_year,
        stream_id,
    };

    let mut rng = generate::seeded_rng(seed);
    match generate::run(conn, &target, &cfg, &mut rng) {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(v) => ok(&req.id, v),
            Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.generate" => Some(handle_timetable_generate(state, req)),
        _ => None,
    }
}
