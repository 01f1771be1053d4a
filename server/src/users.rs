use crate::auth;
use crate::db::{now_ms, uuid_at};
use crate::error::{ChatError, ChatResult};
use crate::model::{Profile, User, DEFAULT_BIO};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

const USER_COLUMNS: &str = "id, username, email, password_hash, name, bio, avatar_url, last_seen, refresh_token, created_at, updated_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        name: row.get(4)?,
        bio: row.get(5)?,
        avatar_url: row.get(6)?,
        last_seen: row.get(7)?,
        refresh_token: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Return the trimmed value or a validation error carrying `msg`.
pub(crate) fn required<'a>(value: Option<&'a str>, msg: &str) -> ChatResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ChatError::validation(msg)),
    }
}

/// Validate input, hash the password and create the account.
pub fn register(
    conn: &Connection,
    username: Option<&str>,
    email: Option<&str>,
    password: Option<&str>,
) -> ChatResult<User> {
    let username = required(username, "User name is required")?;
    let email = required(email, "Email is required")?;
    required(password, "Password is required")?;
    let password = password.unwrap_or_default();
    if !EMAIL_RE.is_match(email) {
        return Err(ChatError::validation("Email is invalid"));
    }
    let hash = auth::hash_password(password)?;
    create_user(conn, username, email, &hash)
}

/// Insert a user with an already hashed password. Username and e-mail are
/// stored lowercase and must both be unused.
pub fn create_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password_hash: &str,
) -> ChatResult<User> {
    let username = username.trim().to_lowercase();
    let email = email.trim().to_lowercase();
    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?1 OR email = ?2",
            params![username, email],
            |row| row.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(ChatError::conflict("User already exists"));
    }
    let id = Uuid::new_v4();
    let now = now_ms();
    let res = conn.execute(
        "INSERT INTO users (id, username, email, password_hash, name, bio, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id.to_string(), username, email, password_hash, username, DEFAULT_BIO, now],
    );
    match res {
        Ok(_) => {}
        Err(e)
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) =>
        {
            return Err(ChatError::conflict("User already exists"));
        }
        Err(e) => return Err(e.into()),
    }
    tracing::info!(user_id = %id, username = %username, "registered user");
    get(conn, id)
}

pub fn find_by_id(conn: &Connection, id: Uuid) -> ChatResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn
        .query_row(&sql, [id.to_string()], row_to_user)
        .optional()?)
}

pub fn find_by_email(conn: &Connection, email: &str) -> ChatResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
    Ok(conn
        .query_row(&sql, [email.trim().to_lowercase()], row_to_user)
        .optional()?)
}

pub fn get(conn: &Connection, id: Uuid) -> ChatResult<User> {
    find_by_id(conn, id)?.ok_or_else(|| ChatError::not_found("User not found"))
}

/// Current profile snapshot of a user.
pub fn profile(conn: &Connection, id: Uuid) -> ChatResult<Profile> {
    conn.query_row(
        "SELECT id, name, bio, avatar_url, last_seen FROM users WHERE id = ?1",
        [id.to_string()],
        |row| {
            Ok(Profile {
                id: uuid_at(row, 0)?,
                name: row.get(1)?,
                bio: row.get(2)?,
                avatar_url: row.get(3)?,
                last_seen: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| ChatError::not_found("User not found"))
}

/// Check login credentials.
pub fn authenticate(
    conn: &Connection,
    email: Option<&str>,
    password: Option<&str>,
) -> ChatResult<User> {
    let email = required(email, "Email is required")?;
    let user = find_by_email(conn, email)?.ok_or_else(|| ChatError::not_found("User not found"))?;
    if !auth::verify_password(password.unwrap_or_default(), &user.password_hash) {
        return Err(ChatError::unauthorized("Password is incorrect"));
    }
    Ok(user)
}

pub fn set_refresh_token(conn: &Connection, id: Uuid, token: Option<&str>) -> ChatResult<()> {
    conn.execute(
        "UPDATE users SET refresh_token = ?2 WHERE id = ?1",
        params![id.to_string(), token],
    )?;
    Ok(())
}

/// Record that the user was just active.
pub fn touch_last_seen(conn: &Connection, id: Uuid) -> ChatResult<()> {
    conn.execute(
        "UPDATE users SET last_seen = ?2 WHERE id = ?1",
        params![id.to_string(), now_ms()],
    )?;
    Ok(())
}

/// Update display name, bio and avatar. A missing bio keeps the current one.
pub fn update_profile(
    conn: &Connection,
    id: Uuid,
    name: Option<&str>,
    bio: Option<&str>,
    avatar_url: Option<&str>,
) -> ChatResult<User> {
    let name = required(name, "Enter your name")?;
    let current = get(conn, id)?;
    let bio = match bio.map(str::trim).filter(|b| !b.is_empty()) {
        Some(b) => b.to_string(),
        None if !current.bio.is_empty() => current.bio.clone(),
        None => DEFAULT_BIO.to_string(),
    };
    let avatar = avatar_url.map(str::to_string).or(current.avatar_url);
    conn.execute(
        "UPDATE users SET name = ?2, bio = ?3, avatar_url = ?4, updated_at = ?5 WHERE id = ?1",
        params![id.to_string(), name, bio, avatar, now_ms()],
    )?;
    get(conn, id)
}

/// Case-insensitive substring search on display names, excluding `requester`.
pub fn search_by_name(conn: &Connection, requester: Uuid, name: Option<&str>) -> ChatResult<Vec<User>> {
    let name = required(name, "Name is required for search")?;
    let escaped = name
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE name LIKE ?1 ESCAPE '\\' AND id <> ?2 ORDER BY name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(
            params![format!("%{escaped}%"), requester.to_string()],
            row_to_user,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    if users.is_empty() {
        return Err(ChatError::not_found("No user found with this name"));
    }
    Ok(users)
}

/// Replace the password of the account owning `email` and end its session.
pub fn reset_password(
    conn: &Connection,
    email: Option<&str>,
    new_password: Option<&str>,
    new_password_again: Option<&str>,
) -> ChatResult<()> {
    let email = required(email, "Enter email")?;
    let (Some(new), Some(again)) = (
        new_password.filter(|p| !p.trim().is_empty()),
        new_password_again.filter(|p| !p.trim().is_empty()),
    ) else {
        return Err(ChatError::validation("Please enter the new passwords"));
    };
    if new != again {
        return Err(ChatError::validation("Password not matched"));
    }
    let user = find_by_email(conn, email)?.ok_or_else(|| ChatError::not_found("User not found"))?;
    let hash = auth::hash_password(new)?;
    conn.execute(
        "UPDATE users SET password_hash = ?2, refresh_token = NULL, updated_at = ?3 WHERE id = ?1",
        params![user.id.to_string(), hash, now_ms()],
    )?;
    tracing::info!(user_id = %user.id, "password reset");
    Ok(())
}
