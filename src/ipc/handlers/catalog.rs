use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, rusqlite::Error> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let stream_id = match required_str(req, "streamId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match required_str(req, "session") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment = req
        .params
        .get("enrollment")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if enrollment < 0 {
        return err(&req.id, "bad_params", "enrollment must be >= 0", None);
    }

    match row_exists(conn, "streams", &stream_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "stream not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, stream_id, session, enrollment)
         VALUES(?, ?, ?, ?, ?)",
        (&class_id, &name, &stream_id, &session, enrollment),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT c.id, c.name, c.stream_id, s.name, c.session, c.enrollment
         FROM classes c
         JOIN streams s ON s.id = c.stream_id",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(stream_id) = optional_str(req, "streamId") {
        sql.push_str(" WHERE c.stream_id = ?");
        binds.push(Value::Text(stream_id));
    }
    sql.push_str(" ORDER BY c.name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "streamId": r.get::<_, String>(2)?,
                "streamName": r.get::<_, String>(3)?,
                "session": r.get::<_, String>(4)?,
                "enrollment": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // NULL session = offered in every session.
    let session = optional_str(req, "session");

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, name, session) VALUES(?, ?, ?, ?)",
        (&course_id, &code, &name, &session),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "code": code }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, code, name, session FROM courses ORDER BY code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "session": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lecturers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = optional_str(req, "session");

    let lecturer_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lecturers(id, name, session) VALUES(?, ?, ?)",
        (&lecturer_id, &name, &session),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lecturers" })),
        );
    }

    ok(&req.id, json!({ "lecturerId": lecturer_id, "name": name }))
}

fn handle_lecturers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, session FROM lecturers ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "session": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(lecturers) => ok(&req.id, json!({ "lecturers": lecturers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match required_str(req, "semester") {
        Ok(v) => v,
        Err(e) => return e,
    };

    for (table, id, what) in [
        ("classes", &class_id, "class"),
        ("courses", &course_id, "course"),
    ] {
        match row_exists(conn, table, id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", format!("{} not found", what), None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO class_courses(id, class_id, course_id, semester, active)
         VALUES(?, ?, ?, ?, 1)",
        (&assignment_id, &class_id, &course_id, &semester),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_courses" })),
        );
    }

    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT cc.id, cc.class_id, c.name, cc.course_id, co.code, cc.semester, cc.active
         FROM class_courses cc
         JOIN classes c ON c.id = cc.class_id
         JOIN courses co ON co.id = cc.course_id
         WHERE 1=1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(class_id) = optional_str(req, "classId") {
        sql.push_str(" AND cc.class_id = ?");
        binds.push(Value::Text(class_id));
    }
    if let Some(semester) = optional_str(req, "semester") {
        sql.push_str(" AND cc.semester = ?");
        binds.push(Value::Text(semester));
    }
    sql.push_str(" ORDER BY c.name, co.code");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classId": r.get::<_, String>(1)?,
                "className": r.get::<_, String>(2)?,
                "courseId": r.get::<_, String>(3)?,
                "courseCode": r.get::<_, String>(4)?,
                "semester": r.get::<_, String>(5)?,
                "active": r.get::<_, i64>(6)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_eligibility_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lecturer_id = match required_str(req, "lecturerId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    for (table, id, what) in [
        ("lecturers", &lecturer_id, "lecturer"),
        ("courses", &course_id, "course"),
    ] {
        match row_exists(conn, table, id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", format!("{} not found", what), None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let eligibility_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lecturer_courses(id, lecturer_id, course_id, active)
         VALUES(?, ?, ?, 1)",
        (&eligibility_id, &lecturer_id, &course_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lecturer_courses" })),
        );
    }

    ok(&req.id, json!({ "eligibilityId": eligibility_id }))
}

fn handle_eligibility_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT lc.id, lc.lecturer_id, l.name, lc.course_id, co.code, lc.active
         FROM lecturer_courses lc
         JOIN lecturers l ON l.id = lc.lecturer_id
         JOIN courses co ON co.id = lc.course_id
         WHERE 1=1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(lecturer_id) = optional_str(req, "lecturerId") {
        sql.push_str(" AND lc.lecturer_id = ?");
        binds.push(Value::Text(lecturer_id));
    }
    if let Some(course_id) = optional_str(req, "courseId") {
        sql.push_str(" AND lc.course_id = ?");
        binds.push(Value::Text(course_id));
    }
    sql.push_str(" ORDER BY l.name, co.code");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lecturerId": r.get::<_, String>(1)?,
                "lecturerName": r.get::<_, String>(2)?,
                "courseId": r.get::<_, String>(3)?,
                "courseCode": r.get::<_, String>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(eligibility) => ok(&req.id, json!({ "eligibility": eligibility })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "lecturers.create" => Some(handle_lecturers_create(state, req)),
        "lecturers.list" => Some(handle_lecturers_list(state, req)),
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "eligibility.create" => Some(handle_eligibility_create(state, req)),
        "eligibility.list" => Some(handle_eligibility_list(state, req)),
        _ => None,
    }
}
