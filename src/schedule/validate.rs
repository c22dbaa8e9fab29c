use rusqlite::{Connection, OptionalExtension};

use super::EngineError;

/// Link rows matched by a successful membership check; manual entries are
/// written against these ids.
#[derive(Debug, Clone)]
pub struct MembershipOk {
    pub class_course_id: String,
    pub lecturer_course_id: String,
}

/// Confirms that (class, course, lecturer, semester, session) is a legal
/// teaching assignment. Checks run in a fixed order and stop at the first
/// failure, each with its own code, so callers can name the rule that
/// blocked the operation. Nothing is written.
pub fn check_membership(
    conn: &Connection,
    class_id: &str,
    course_id: &str,
    lecturer_id: &str,
    semester: &str,
    session: &str,
) -> Result<MembershipOk, EngineError> {
    let class_course_id: Option<String> = conn
        .query_row(
            "SELECT id FROM class_courses
             WHERE class_id = ? AND course_id = ? AND semester = ? AND active = 1",
            (class_id, course_id, semester),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let Some(class_course_id) = class_course_id else {
        return Err(EngineError::new(
            "class_not_enrolled",
            "class is not enrolled in this course for the semester",
        ));
    };

    let lecturer_course_id: Option<String> = conn
        .query_row(
            "SELECT id FROM lecturer_courses
             WHERE lecturer_id = ? AND course_id = ? AND active = 1",
            (lecturer_id, course_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let Some(lecturer_course_id) = lecturer_course_id else {
        return Err(EngineError::new(
            "lecturer_not_eligible",
            "lecturer is not eligible to teach this course",
        ));
    };

    // NULL session on a lecturer or course means available in every session.
    let lecturer_session: Option<Option<String>> = conn
        .query_row(
            "SELECT session FROM lecturers WHERE id = ?",
            [lecturer_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let Some(lecturer_session) = lecturer_session else {
        return Err(EngineError::new("not_found", "lecturer not found"));
    };
    if lecturer_session.is_some_and(|s| s != session) {
        return Err(EngineError::new(
            "lecturer_not_in_session",
            "lecturer is not available in this session",
        ));
    }

    let course_session: Option<Option<String>> = conn
        .query_row(
            "SELECT session FROM courses WHERE id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let Some(course_session) = course_session else {
        return Err(EngineError::new("not_found", "course not found"));
    };
    if course_session.is_some_and(|s| s != session) {
        return Err(EngineError::new(
            "course_not_in_session",
            "course is not offered in this session",
        ));
    }

    let class_session: Option<String> = conn
        .query_row(
            "SELECT session FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let Some(class_session) = class_session else {
        return Err(EngineError::new("not_found", "class not found"));
    };
    if class_session != session {
        return Err(EngineError::new(
            "class_not_in_session",
            "class does not belong to this session",
        ));
    }

    Ok(MembershipOk {
        class_course_id,
        lecturer_course_id,
    })
}
