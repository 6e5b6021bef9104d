use crate::auth::AuthError;
use crate::ledger::LedgerError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn ledger_err(id: &str, e: &LedgerError) -> serde_json::Value {
    let details = match e {
        LedgerError::AlreadyEnrolled {
            student_id,
            course_id,
        }
        | LedgerError::NotEnrolled {
            student_id,
            course_id,
        } => Some(json!({ "studentId": student_id, "courseId": course_id })),
        LedgerError::CourseFull {
            course_id,
            capacity,
        } => Some(json!({ "courseId": course_id, "capacity": capacity })),
        LedgerError::GradeAlreadyRecorded { selection_id } => {
            Some(json!({ "selectionId": selection_id }))
        }
        LedgerError::EntityNotFound { entity, id } => {
            Some(json!({ "entity": entity, "id": id }))
        }
        LedgerError::CapacityBelowEnrollment {
            course_id,
            requested,
            active,
        } => Some(json!({
            "courseId": course_id,
            "requested": requested,
            "active": active
        })),
        _ => None,
    };
    err(id, e.code(), e.to_string(), details)
}

pub fn auth_err(id: &str, e: &AuthError) -> serde_json::Value {
    let details = match e {
        AuthError::WeakPassword { min } => Some(json!({ "minLength": min })),
        _ => None,
    };
    err(id, e.code(), e.to_string(), details)
}
