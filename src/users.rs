use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{from_ts, to_ts};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub auth_subject: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// IANA timezone name, used for local-day math (streaks, day-of-week
    /// achievements). Defaults to UTC until the user sets one.
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

/// Create-on-first-sign-in lookup keyed by the external auth subject id.
/// Idempotent: an existing row is returned unchanged apart from refreshed
/// display fields.
pub fn ensure_user(
    conn: &Connection,
    auth_subject: &str,
    display_name: &str,
    avatar_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<User> {
    let existing = conn
        .query_row(
            "SELECT id FROM users WHERE auth_subject = ?1",
            [auth_subject],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    let id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE users SET display_name = ?1, avatar_url = ?2 WHERE id = ?3",
                params![display_name, avatar_url, id],
            )?;
            id
        }
        None => {
            conn.execute(
                r#"
                INSERT INTO users (auth_subject, display_name, avatar_url, timezone, created_at)
                VALUES (?1, ?2, ?3, 'UTC', ?4)
                "#,
                params![auth_subject, display_name, avatar_url, to_ts(now)],
            )?;
            conn.last_insert_rowid()
        }
    };

    get_user(conn, id)
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        r#"
        SELECT id, auth_subject, display_name, avatar_url, timezone, created_at
        FROM users WHERE id = ?1
        "#,
        [id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                auth_subject: row.get(1)?,
                display_name: row.get(2)?,
                avatar_url: row.get(3)?,
                timezone: row.get(4)?,
                created_at: from_ts(&row.get::<_, String>(5)?)?,
            })
        },
    )
    .optional()?
    .ok_or(EngineError::UserNotFound(id))
}

/// Assign the user's IANA timezone. Rejected when the name is not in the tz
/// database, so bad strings never poison later local-day math.
pub fn set_timezone(conn: &Connection, id: i64, timezone: &str) -> Result<()> {
    if timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(EngineError::UnknownTimezone(timezone.to_string()));
    }
    let changed = conn.execute(
        "UPDATE users SET timezone = ?1 WHERE id = ?2",
        params![timezone, id],
    )?;
    if changed == 0 {
        return Err(EngineError::UserNotFound(id));
    }
    Ok(())
}
