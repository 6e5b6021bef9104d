use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub const ADMIN_USER_ID: &str = "A000001";
pub const ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Counselor,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            "counselor" => Some(Self::Counselor),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
            Self::Counselor => "counselor",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },
    #[error("unknown role stored for user {0}")]
    UnknownRole(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountDisabled => "account_disabled",
            Self::WeakPassword { .. } => "weak_password",
            Self::UnknownRole(_) => "storage_error",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// An authenticated caller. `person_id` is the role-scoped identifier
/// (student, teacher or counselor id); admins have none.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub person_id: Option<String>,
}

/// Stored form is `salt$sha256hex(salt || password)`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, digest_hex(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    digest_hex(salt, password) == expected
}

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn login(conn: &Connection, username: &str, password: &str) -> Result<Session, AuthError> {
    let row: Option<(String, String, String, i64, Option<String>)> = conn
        .query_row(
            "SELECT
               u.user_id,
               u.password,
               u.role,
               u.status,
               COALESCE(s.student_id, t.teacher_id, c.counselor_id) AS person_id
             FROM users u
             LEFT JOIN students s ON s.user_id = u.user_id
             LEFT JOIN teachers t ON t.user_id = u.user_id
             LEFT JOIN counselors c ON c.user_id = u.user_id
             WHERE u.username = ?",
            [username],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;

    let Some((user_id, stored, role_raw, status, person_id)) = row else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &stored) {
        return Err(AuthError::InvalidCredentials);
    }
    if status == 0 {
        return Err(AuthError::AccountDisabled);
    }
    let role = Role::parse(&role_raw).ok_or_else(|| AuthError::UnknownRole(user_id.clone()))?;

    Ok(Session {
        user_id,
        username: username.to_string(),
        role,
        person_id,
    })
}

/// Length is counted in characters, not bytes.
pub fn check_password_strength(password: &str, min_len: usize) -> Result<(), AuthError> {
    if password.chars().count() < min_len {
        return Err(AuthError::WeakPassword { min: min_len });
    }
    Ok(())
}

pub fn change_password(
    conn: &Connection,
    user_id: &str,
    old_password: &str,
    new_password: &str,
    min_len: usize,
) -> Result<(), AuthError> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT password FROM users WHERE user_id = ?",
            [user_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(stored) = stored else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(old_password, &stored) {
        return Err(AuthError::InvalidCredentials);
    }
    check_password_strength(new_password, min_len)?;
    conn.execute(
        "UPDATE users SET password = ? WHERE user_id = ?",
        (hash_password(new_password), user_id),
    )?;
    Ok(())
}

/// Creates the `admin` account on a workspace that has no admin yet.
/// Returns whether an account was created.
pub fn bootstrap_admin(conn: &Connection, password: &str) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO users(user_id, username, password, role, status, created_at)
         SELECT ?, ?, ?, 'admin', 1, ?
         WHERE NOT EXISTS (SELECT 1 FROM users WHERE role = 'admin')",
        (
            ADMIN_USER_ID,
            ADMIN_USERNAME,
            hash_password(password),
            crate::db::now_stamp(),
        ),
    )?;
    Ok(inserted > 0)
}
