use std::collections::HashSet;

use chrono::{NaiveTime, Timelike};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use super::{EngineError, SchedulerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotSource {
    Mapped,
    Synthesized,
    Global,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub id: String,
    pub name: String,
    pub day_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSlot {
    /// None for synthesized windows that have not been materialized yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub is_break: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCalendar {
    pub source: SlotSource,
    pub days: Vec<CalendarDay>,
    pub slots: Vec<CalendarSlot>,
}

impl StreamCalendar {
    /// Slots a session may actually occupy.
    pub fn teaching_slots(&self) -> impl Iterator<Item = &CalendarSlot> {
        self.slots.iter().filter(|s| !s.is_break)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamWindows {
    pub period_start: Option<String>,
    pub period_end: Option<String>,
    pub break_start: Option<String>,
    pub break_end: Option<String>,
}

/// Resolves the teaching calendar for one stream from already-loaded rows,
/// so the resolution rules can be exercised without a database.
///
/// Days: the stream's declared weekday set intersected with the globally
/// active days; an empty declared set means all globally active days.
/// Slots, in priority order: a non-empty explicit slot mapping, then
/// windows synthesized from the stream's period/break times, then the
/// global mandatory slot table.
pub fn resolve_calendar(
    windows: &StreamWindows,
    active_days: &[CalendarDay],
    stream_day_ids: &HashSet<String>,
    mapped_slots: &[CalendarSlot],
    global_slots: &[CalendarSlot],
    cfg: &SchedulerConfig,
) -> Result<StreamCalendar, EngineError> {
    let days: Vec<CalendarDay> = if stream_day_ids.is_empty() {
        active_days.to_vec()
    } else {
        active_days
            .iter()
            .filter(|d| stream_day_ids.contains(&d.id))
            .cloned()
            .collect()
    };

    if !mapped_slots.is_empty() {
        return Ok(StreamCalendar {
            source: SlotSource::Mapped,
            days,
            slots: mapped_slots.to_vec(),
        });
    }

    // Unparseable period times are treated as undeclared rather than
    // failing the whole resolution.
    if let (Some(start), Some(end)) = (
        windows.period_start.as_deref().and_then(parse_hhmm),
        windows.period_end.as_deref().and_then(parse_hhmm),
    ) {
        let break_window = match (
            windows.break_start.as_deref().and_then(parse_hhmm),
            windows.break_end.as_deref().and_then(parse_hhmm),
        ) {
            (Some(bs), Some(be)) if bs < be => Some((bs, be)),
            _ => None,
        };
        let slots = synthesize_slots(start, end, break_window, cfg)?;
        return Ok(StreamCalendar {
            source: SlotSource::Synthesized,
            days,
            slots,
        });
    }

    Ok(StreamCalendar {
        source: SlotSource::Global,
        days,
        slots: global_slots.to_vec(),
    })
}

/// Consecutive fixed-length windows from the period start to the period end.
/// The final window is truncated at the period end; a window that would
/// cross the break is truncated at the break start and the cursor resumes
/// at the break end, so nothing ever overlaps `[break_start, break_end)`.
fn synthesize_slots(
    period_start: i64,
    period_end: i64,
    break_window: Option<(i64, i64)>,
    cfg: &SchedulerConfig,
) -> Result<Vec<CalendarSlot>, EngineError> {
    let step = cfg.synthesized_slot_minutes.max(1);
    let mut slots = Vec::new();
    let mut cursor = period_start;
    while cursor < period_end {
        if let Some((break_start, break_end)) = break_window {
            if cursor >= break_start && cursor < break_end {
                cursor = break_end;
                continue;
            }
        }
        let mut end = (cursor + step).min(period_end);
        if let Some((break_start, _)) = break_window {
            if cursor < break_start && end > break_start {
                end = break_start;
            }
        }
        if slots.len() >= cfg.max_synthesized_slots {
            return Err(EngineError {
                code: "slot_budget_exceeded".to_string(),
                message: format!(
                    "period window would synthesize more than {} slots",
                    cfg.max_synthesized_slots
                ),
                details: Some(serde_json::json!({
                    "maxSynthesizedSlots": cfg.max_synthesized_slots
                })),
            });
        }
        slots.push(CalendarSlot {
            slot_id: None,
            start_time: format_hhmm(cursor),
            end_time: format_hhmm(end),
            is_break: false,
        });
        cursor = end;
    }
    Ok(slots)
}

/// "HH:MM" to minutes since midnight; None when the text is not a time.
pub fn parse_hhmm(s: &str) -> Option<i64> {
    let t = NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()?;
    Some(i64::from(t.hour()) * 60 + i64::from(t.minute()))
}

fn format_hhmm(minutes: i64) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

pub fn load_stream_calendar(
    conn: &Connection,
    stream_id: &str,
    cfg: &SchedulerConfig,
) -> Result<StreamCalendar, EngineError> {
    let windows: Option<StreamWindows> = conn
        .query_row(
            "SELECT period_start, period_end, break_start, break_end
             FROM streams WHERE id = ?",
            [stream_id],
            |r| {
                Ok(StreamWindows {
                    period_start: r.get(0)?,
                    period_end: r.get(1)?,
                    break_start: r.get(2)?,
                    break_end: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let Some(windows) = windows else {
        return Err(EngineError::new("not_found", "stream not found"));
    };

    let active_days = load_active_days(conn)?;
    let stream_day_ids = load_stream_day_ids(conn, stream_id)?;
    let mapped_slots = load_mapped_slots(conn, stream_id)?;
    let global_slots = load_global_slots(conn)?;

    resolve_calendar(
        &windows,
        &active_days,
        &stream_day_ids,
        &mapped_slots,
        &global_slots,
        cfg,
    )
}

fn load_active_days(conn: &Connection) -> Result<Vec<CalendarDay>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT id, name, day_order FROM days WHERE active = 1 ORDER BY day_order")
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([], |r| {
        Ok(CalendarDay {
            id: r.get(0)?,
            name: r.get(1)?,
            day_order: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| EngineError::new("db_query_failed", e.to_string()))
}

fn load_stream_day_ids(conn: &Connection, stream_id: &str) -> Result<HashSet<String>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT day_id FROM stream_days WHERE stream_id = ?")
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([stream_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))
}

fn load_mapped_slots(conn: &Connection, stream_id: &str) -> Result<Vec<CalendarSlot>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT ts.id, ts.start_time, ts.end_time, ts.is_break
             FROM stream_slots ss
             JOIN time_slots ts ON ts.id = ss.slot_id
             WHERE ss.stream_id = ?
             ORDER BY ss.sort_order, ts.start_time",
        )
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([stream_id], |r| {
        Ok(CalendarSlot {
            slot_id: Some(r.get(0)?),
            start_time: r.get(1)?,
            end_time: r.get(2)?,
            is_break: r.get::<_, i64>(3)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| EngineError::new("db_query_failed", e.to_string()))
}

fn load_global_slots(conn: &Connection) -> Result<Vec<CalendarSlot>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, start_time, end_time, is_break FROM time_slots
             WHERE is_mandatory = 1 AND is_break = 0
             ORDER BY start_time",
        )
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([], |r| {
        Ok(CalendarSlot {
            slot_id: Some(r.get(0)?),
            start_time: r.get(1)?,
            end_time: r.get(2)?,
            is_break: r.get::<_, i64>(3)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| EngineError::new("db_query_failed", e.to_string()))
}
