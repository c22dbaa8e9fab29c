
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

type Io<'a> = (&'a mut ChildStdin, &'a mut BufReader<ChildStdout>);

fn created_id(io: Io, id: &str, method: &str, params: serde_json::Value, key: &str) -> String {
    let (stdin, reader) = io;
    request_ok(stdin, reader, id, method, params)
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("{} returned no {}", method, key))
        .to_string()
}

fn monday_id(io: Io) -> String {
    let (stdin, reader) = io;
    let seeded = request_ok(stdin, reader, "seed-days", "days.seed", json!({}));
    seeded
        .get("days")
        .and_then(|v| v.as_array())
        .and_then(|days| {
            days.iter()
                .find(|d| d.get("name").and_then(|v| v.as_str()) == Some("Monday"))
        })
        .and_then(|d| d.get("id"))
        .and_then(|v| v.as_str())
        .expect("seeded Monday")
        .to_string()
}

fn entry_rows(io: Io, id: &str, filter: serde_json::Value) -> Vec<serde_json::Value> {
    let (stdin, reader) = io;
    request_ok(stdin, reader, id, "entries.list", filter)
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries")
        .clone()
}

#[test]
fn contention_reports_each_leftover_assignment() {
    let workspace = temp_dir("timetable-contention");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let monday = monday_id((&mut stdin, &mut reader));
    let slot = created_id(
        (&mut stdin, &mut reader),
        "2",
        "slots.create",
        json!({ "startTime": "08:00", "endTime": "09:00" }),
        "slotId",
    );
    let _room = created_id(
        (&mut stdin, &mut reader),
        "3",
        "rooms.create",
        json!({ "name": "Room 1" }),
        "roomId",
    );
    let stream = created_id(
        (&mut stdin, &mut reader),
        "4",
        "streams.create",
        json!({ "name": "Core" }),
        "streamId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "streams.setDays",
        json!({ "streamId": stream, "dayIds": [monday] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "streams.setSlots",
        json!({ "streamId": stream, "slotIds": [slot] }),
    );

    let course = created_id(
        (&mut stdin, &mut reader),
        "7",
        "courses.create",
        json!({ "code": "MTH101", "name": "Algebra" }),
        "courseId",
    );
    let lecturer = created_id(
        (&mut stdin, &mut reader),
        "8",
        "lecturers.create",
        json!({ "name": "Dr. Oti" }),
        "lecturerId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "eligibility.create",
        json!({ "lecturerId": lecturer, "courseId": course }),
    );
    let mut class_ids = Vec::new();
    for i in 0..2 {
        let class = created_id(
            (&mut stdin, &mut reader),
            &format!("c{}", i),
            "classes.create",
            json!({
                "name": format!("Core-{}", i + 1),
                "streamId": stream,
                "session": "morning",
                "enrollment": 30
            }),
            "classId",
        );
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "assignments.create",
            json!({ "classId": class, "courseId": course, "semester": "1" }),
        );
        class_ids.push(class);
    }

    // One seat, two takers.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.generate",
        json!({ "semester": "1", "academicYear": "2025", "seed": 3 }),
    );
    assert_eq!(report.get("placed").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(report.get("unplaced").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        report.pointer("/streams/0/unplacedAssignments/0/reason"),
        Some(&json!("no_free_slot"))
    );

    // A course nobody is eligible to teach is reported, not silently skipped.
    let orphan = created_id(
        (&mut stdin, &mut reader),
        "11",
        "courses.create",
        json!({ "code": "ORP900", "name": "Orphan Seminar" }),
        "courseId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "assignments.create",
        json!({ "classId": class_ids[0], "courseId": orphan, "semester": "1" }),
    );
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "timetable.generate",
        json!({ "semester": "1", "academicYear": "2025", "seed": 3 }),
    );
    assert_eq!(report.get("placed").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(report.get("unplaced").and_then(|v| v.as_i64()), Some(2));
    let leftovers = report
        .pointer("/streams/0/unplacedAssignments")
        .and_then(|v| v.as_array())
        .expect("unplacedAssignments");
    let mut reasons: Vec<&str> = leftovers
        .iter()
        .map(|u| u.get("reason").and_then(|v| v.as_str()).expect("reason"))
        .collect();
    reasons.sort();
    assert_eq!(reasons, vec!["no_eligible_lecturer", "no_free_slot"]);
    let starved = leftovers
        .iter()
        .find(|u| u.get("reason") == Some(&json!("no_eligible_lecturer")))
        .expect("starved assignment");
    assert_eq!(starved.get("courseId"), Some(&json!(orphan)));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn generation_scope_leaves_other_terms_alone() {
    let workspace = temp_dir("timetable-scope");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let monday = monday_id((&mut stdin, &mut reader));
    let slot = created_id(
        (&mut stdin, &mut reader),
        "2",
        "slots.create",
        json!({ "startTime": "08:00", "endTime": "09:00" }),
        "slotId",
    );
    let spare_slot = created_id(
        (&mut stdin, &mut reader),
        "3",
        "slots.create",
        json!({ "startTime": "09:00", "endTime": "10:00" }),
        "slotId",
    );
    let room = created_id(
        (&mut stdin, &mut reader),
        "4",
        "rooms.create",
        json!({ "name": "Room 1" }),
        "roomId",
    );
    let stream = created_id(
        (&mut stdin, &mut reader),
        "5",
        "streams.create",
        json!({ "name": "Core" }),
        "streamId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "streams.setDays",
        json!({ "streamId": stream, "dayIds": [monday] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "streams.setSlots",
        json!({ "streamId": stream, "slotIds": [slot] }),
    );
    let class = created_id(
        (&mut stdin, &mut reader),
        "8",
        "classes.create",
        json!({ "name": "Core-1", "streamId": stream, "session": "morning", "enrollment": 30 }),
        "classId",
    );
    let course = created_id(
        (&mut stdin, &mut reader),
        "9",
        "courses.create",
        json!({ "code": "MTH101", "name": "Algebra" }),
        "courseId",
    );
    let lecturer = created_id(
        (&mut stdin, &mut reader),
        "10",
        "lecturers.create",
        json!({ "name": "Dr. Oti" }),
        "lecturerId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "eligibility.create",
        json!({ "lecturerId": lecturer, "courseId": course }),
    );
    for (id, semester) in [("12", "1"), ("13", "2")] {
        request_ok(
            &mut stdin,
            &mut reader,
            id,
            "assignments.create",
            json!({ "classId": class, "courseId": course, "semester": semester }),
        );
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "timetable.generate",
        json!({ "semester": "1", "academicYear": "2025", "seed": 9 }),
    );
    assert_eq!(
        entry_rows(
            (&mut stdin, &mut reader),
            "15",
            json!({ "semester": "1", "academicYear": "2025" })
        )
        .len(),
        1
    );

    // Same coordinates in semester 2 and in last year's semester 1; the
    // conflict gate and the generator scope both ignore them.
    request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "entries.add",
        json!({
            "classId": class,
            "courseId": course,
            "lecturerId": lecturer,
            "dayId": monday,
            "slotId": slot,
            "roomId": room,
            "semester": "2",
            "academicYear": "2025",
            "session": "morning"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "entries.add",
        json!({
            "classId": class,
            "courseId": course,
            "lecturerId": lecturer,
            "dayId": monday,
            "slotId": spare_slot,
            "roomId": room,
            "semester": "1",
            "academicYear": "2024",
            "session": "morning"
        }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "timetable.generate",
        json!({ "semester": "1", "academicYear": "2025", "seed": 9 }),
    );
    assert_eq!(
        entry_rows(
            (&mut stdin, &mut reader),
            "19",
            json!({ "semester": "1", "academicYear": "2025" })
        )
        .len(),
        1
    );
    assert_eq!(
        entry_rows((&mut stdin, &mut reader), "20", json!({ "semester": "2" })).len(),
        1
    );
    assert_eq!(
        entry_rows(
            (&mut stdin, &mut reader),
            "21",
            json!({ "semester": "1", "academicYear": "2024" })
        )
        .len(),
        1
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn targeted_generation_rebuilds_one_stream() {
    let workspace = temp_dir("timetable-targeted");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let monday = monday_id((&mut stdin, &mut reader));
    created_id(
        (&mut stdin, &mut reader),
        "2",
        "rooms.create",
        json!({ "name": "Shared Hall" }),
        "roomId",
    );

    let mut streams = Vec::new();
    let mut classes = Vec::new();
    for (i, (name, start, end)) in [
        ("Stream A", "08:00", "09:00"),
        ("Stream B", "09:00", "10:00"),
    ]
    .iter()
    .enumerate()
    {
        let stream = created_id(
            (&mut stdin, &mut reader),
            &format!("st{}", i),
            "streams.create",
            json!({ "name": name }),
            "streamId",
        );
        let slot = created_id(
            (&mut stdin, &mut reader),
            &format!("sl{}", i),
            "slots.create",
            json!({ "startTime": start, "endTime": end }),
            "slotId",
        );
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("sd{}", i),
            "streams.setDays",
            json!({ "streamId": stream, "dayIds": [monday] }),
        );
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("ss{}", i),
            "streams.setSlots",
            json!({ "streamId": stream, "slotIds": [slot] }),
        );
        let class = created_id(
            (&mut stdin, &mut reader),
            &format!("cl{}", i),
            "classes.create",
            json!({
                "name": format!("{} Class", name),
                "streamId": stream,
                "session": "morning",
                "enrollment": 30
            }),
            "classId",
        );
        let course = created_id(
            (&mut stdin, &mut reader),
            &format!("co{}", i),
            "courses.create",
            json!({ "code": format!("GEN10{}", i), "name": format!("{} Course", name) }),
            "courseId",
        );
        let lecturer = created_id(
            (&mut stdin, &mut reader),
            &format!("le{}", i),
            "lecturers.create",
            json!({ "name": format!("{} Lecturer", name) }),
            "lecturerId",
        );
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("as{}", i),
            "assignments.create",
            json!({ "classId": class, "courseId": course, "semester": "1" }),
        );
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("el{}", i),
            "eligibility.create",
            json!({ "lecturerId": lecturer, "courseId": course }),
        );
        streams.push(stream);
        classes.push(class);
    }

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.generate",
        json!({ "semester": "1", "academicYear": "2025", "seed": 5 }),
    );
    assert_eq!(report.get("placed").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        report.get("streams").and_then(|v| v.as_array()).map(|s| s.len()),
        Some(2)
    );

    let entry_id_for = |rows: &[serde_json::Value], class_id: &str| -> String {
        rows.iter()
            .find(|e| e.get("classId").and_then(|v| v.as_str()) == Some(class_id))
            .and_then(|e| e.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| panic!("no entry for class {}", class_id))
            .to_string()
    };
    let before = entry_rows((&mut stdin, &mut reader), "4", json!({ "semester": "1" }));
    assert_eq!(before.len(), 2);
    let a_before = entry_id_for(&before, &classes[0]);
    let b_before = entry_id_for(&before, &classes[1]);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "timetable.generate",
        json!({
            "semester": "1",
            "academicYear": "2025",
            "streamId": streams[1],
            "seed": 5
        }),
    );
    assert_eq!(report.get("placed").and_then(|v| v.as_i64()), Some(1));
    let stream_reports = report
        .get("streams")
        .and_then(|v| v.as_array())
        .expect("streams");
    assert_eq!(stream_reports.len(), 1);
    assert_eq!(
        stream_reports[0].get("streamId"),
        Some(&json!(streams[1].clone()))
    );

    // Stream A's entry is untouched; stream B's was rebuilt.
    let after = entry_rows((&mut stdin, &mut reader), "6", json!({ "semester": "1" }));
    assert_eq!(after.len(), 2);
    assert_eq!(entry_id_for(&after, &classes[0]), a_before);
    assert_ne!(entry_id_for(&after, &classes[1]), b_before);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_run_aborts_before_clearing() {
    let workspace = temp_dir("timetable-abort");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let monday = monday_id((&mut stdin, &mut reader));
    let slot = created_id(
        (&mut stdin, &mut reader),
        "2",
        "slots.create",
        json!({ "startTime": "08:00", "endTime": "09:00" }),
        "slotId",
    );
    created_id(
        (&mut stdin, &mut reader),
        "3",
        "rooms.create",
        json!({ "name": "Room 1" }),
        "roomId",
    );
    let stream = created_id(
        (&mut stdin, &mut reader),
        "4",
        "streams.create",
        json!({ "name": "Core" }),
        "streamId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "streams.setDays",
        json!({ "streamId": stream, "dayIds": [monday] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "streams.setSlots",
        json!({ "streamId": stream, "slotIds": [slot] }),
    );
    let class = created_id(
        (&mut stdin, &mut reader),
        "7",
        "classes.create",
        json!({ "name": "Core-1", "streamId": stream, "session": "morning", "enrollment": 30 }),
        "classId",
    );
    let course = created_id(
        (&mut stdin, &mut reader),
        "8",
        "courses.create",
        json!({ "code": "MTH101", "name": "Algebra" }),
        "courseId",
    );
    let lecturer = created_id(
        (&mut stdin, &mut reader),
        "9",
        "lecturers.create",
        json!({ "name": "Dr. Oti" }),
        "lecturerId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "assignments.create",
        json!({ "classId": class, "courseId": course, "semester": "1" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "eligibility.create",
        json!({ "lecturerId": lecturer, "courseId": course }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "timetable.generate",
        json!({ "semester": "1", "academicYear": "2025", "seed": 1 }),
    );
    let before = entry_rows((&mut stdin, &mut reader), "13", json!({ "semester": "1" }));
    assert_eq!(before.len(), 1);
    let kept_id = before[0].get("id").and_then(|v| v.as_str()).expect("id").to_string();

    // Shrink the budget, drop the slot mapping, and hand the stream a period
    // window too wide for it.
    request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "setup.update",
        json!({ "section": "scheduler", "patch": { "maxSynthesizedSlots": 2 } }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "streams.setSlots",
        json!({ "streamId": stream, "slotIds": [] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "streams.update",
        json!({ "streamId": stream, "periodStart": "08:00", "periodEnd": "12:00" }),
    );

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "17",
            "streams.calendar",
            json!({ "streamId": stream }),
        ),
        "slot_budget_exceeded"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "18",
            "timetable.generate",
            json!({ "semester": "1", "academicYear": "2025", "seed": 1 }),
        ),
        "slot_budget_exceeded"
    );

    // The failed run never got as far as clearing the old timetable.
    let after = entry_rows((&mut stdin, &mut reader), "19", json!({ "semester": "1" }));
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].get("id").and_then(|v| v.as_str()), Some(kept_id.as_str()));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn missing_rooms_and_empty_calendars_abort() {
    let workspace = temp_dir("timetable-preflight");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", "days.seed", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "streams.create",
        json!({ "name": "Bare" }),
    );

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "4",
            "timetable.generate",
            json!({ "semester": "1", "academicYear": "2025" }),
        ),
        "no_active_rooms"
    );

    // With a room the run gets as far as the calendar, which has no slot
    // source at all.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "rooms.create",
        json!({ "name": "Room 1" }),
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "6",
            "timetable.generate",
            json!({ "semester": "1", "academicYear": "2025" }),
        ),
        "empty_calendar"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
