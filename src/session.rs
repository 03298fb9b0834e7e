use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::db::{from_ts, to_ts};
use crate::error::Result;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display, strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TestMode {
    /// Time-boxed test: type as much as possible within a target duration.
    Time,
    /// Type a target number of words.
    Words,
    /// Type a fixed quote / preset text to completion.
    Quote,
    /// Open-ended free typing, no fixed target.
    Zen,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Difficulty {
    Normal,
    Expert,
    Master,
}

/// Exercise settings chosen by the client at session start. Stored verbatim
/// on the session row (JSON) and echoed onto the finalized result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSettings {
    pub mode: TestMode,
    /// Target duration for time mode, seconds.
    pub target_secs: Option<f64>,
    /// Target word count for words mode.
    pub target_words: Option<usize>,
    pub difficulty: Difficulty,
    /// Punctuation/capitalization modifier.
    pub punctuation: bool,
}

impl ExerciseSettings {
    pub fn timed(secs: f64) -> Self {
        Self {
            mode: TestMode::Time,
            target_secs: Some(secs),
            target_words: None,
            difficulty: Difficulty::Normal,
            punctuation: false,
        }
    }

    pub fn words(count: usize) -> Self {
        Self {
            mode: TestMode::Words,
            target_secs: None,
            target_words: Some(count),
            difficulty: Difficulty::Normal,
            punctuation: false,
        }
    }

    pub fn quote() -> Self {
        Self {
            mode: TestMode::Quote,
            target_secs: None,
            target_words: None,
            difficulty: Difficulty::Normal,
            punctuation: false,
        }
    }

    pub fn zen() -> Self {
        Self {
            mode: TestMode::Zen,
            target_secs: None,
            target_words: None,
            difficulty: Difficulty::Normal,
            punctuation: false,
        }
    }
}

/// One in-progress typing attempt. Ephemeral: consumed by finalize, removed
/// by cancel, or replaced by a later `start` once the grace window expires.
#[derive(Debug, Clone, PartialEq)]
pub struct TypingSession {
    pub id: i64,
    pub user_id: i64,
    pub settings: ExerciseSettings,
    pub target_text: String,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub heartbeat_count: u32,
    pub last_typed_length: u32,
    /// Largest single-heartbeat character delta seen so far.
    pub max_burst_chars: u32,
    /// Largest observed characters-per-second between two heartbeats.
    pub max_burst_cps: f64,
}

/// Burst metrics derived from one progress report. `None` when the typed
/// length shrank (backspace) — backspaces never touch burst maxima.
pub fn burst_update(last_length: u32, typed_length: u32, secs_since_last: f64) -> Option<(u32, f64)> {
    if typed_length < last_length {
        return None;
    }
    let delta = typed_length - last_length;
    let cps = if secs_since_last > 0.0 {
        delta as f64 / secs_since_last
    } else {
        0.0
    };
    Some((delta, cps))
}

/// Start a new attempt, or resume the user's existing one when it is still
/// within the resume grace window (page-reload recovery). At most one live
/// session per user: anything older is deleted and replaced.
pub fn start(
    conn: &Connection,
    cfg: &ValidationConfig,
    user_id: i64,
    settings: &ExerciseSettings,
    target_text: &str,
    now: DateTime<Utc>,
) -> Result<TypingSession> {
    if let Some(existing) = get_for_user(conn, user_id)? {
        let age_secs = (now - existing.started_at).num_milliseconds() as f64 / 1000.0;
        if age_secs < cfg.session_resume_grace_secs {
            return Ok(existing);
        }
        delete(conn, existing.id)?;
    }

    // Normalize through the stored encoding so resumed reads compare equal.
    let now = from_ts(&to_ts(now))?;
    let ts = to_ts(now);
    conn.execute(
        r#"
        INSERT INTO sessions
            (user_id, settings, target_text, created_at, started_at, last_heartbeat_at)
        VALUES (?1, ?2, ?3, ?4, ?4, ?4)
        "#,
        params![
            user_id,
            serde_json::to_string(settings).unwrap_or_default(),
            target_text,
            ts,
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::debug!(session_id = id, user_id, "session started");

    Ok(TypingSession {
        id,
        user_id,
        settings: settings.clone(),
        target_text: target_text.to_string(),
        created_at: now,
        started_at: now,
        last_heartbeat_at: now,
        heartbeat_count: 0,
        last_typed_length: 0,
        max_burst_chars: 0,
        max_burst_cps: 0.0,
    })
}

/// Record a progress heartbeat. Returns false (not an error) when the
/// session no longer exists: the client cannot tell an expired session from
/// a network hiccup and must not crash mid-test.
pub fn record_progress(
    conn: &Connection,
    session_id: i64,
    typed_length: u32,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(sess) = get(conn, session_id)? else {
        return Ok(false);
    };

    let secs_since_last = (now - sess.last_heartbeat_at).num_milliseconds() as f64 / 1000.0;
    let (max_burst_chars, max_burst_cps) =
        match burst_update(sess.last_typed_length, typed_length, secs_since_last) {
            Some((delta, cps)) => (
                sess.max_burst_chars.max(delta),
                sess.max_burst_cps.max(cps),
            ),
            None => (sess.max_burst_chars, sess.max_burst_cps),
        };

    conn.execute(
        r#"
        UPDATE sessions
        SET last_heartbeat_at = ?1,
            heartbeat_count = heartbeat_count + 1,
            last_typed_length = ?2,
            max_burst_chars = ?3,
            max_burst_cps = ?4
        WHERE id = ?5
        "#,
        params![
            to_ts(now),
            typed_length,
            max_burst_chars,
            max_burst_cps,
            session_id
        ],
    )?;
    Ok(true)
}

pub fn get(conn: &Connection, session_id: i64) -> Result<Option<TypingSession>> {
    let sess = conn
        .query_row(
            &format!("{SELECT_SESSION} WHERE id = ?1"),
            [session_id],
            from_row,
        )
        .optional()?;
    Ok(sess)
}

pub fn get_for_user(conn: &Connection, user_id: i64) -> Result<Option<TypingSession>> {
    let sess = conn
        .query_row(
            &format!("{SELECT_SESSION} WHERE user_id = ?1"),
            [user_id],
            from_row,
        )
        .optional()?;
    Ok(sess)
}

/// Unconditional delete; deleting an already-gone session is fine.
pub fn delete(conn: &Connection, session_id: i64) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
    Ok(())
}

const SELECT_SESSION: &str = r#"
    SELECT id, user_id, settings, target_text, created_at, started_at,
           last_heartbeat_at, heartbeat_count, last_typed_length,
           max_burst_chars, max_burst_cps
    FROM sessions
"#;

fn from_row(row: &Row) -> rusqlite::Result<TypingSession> {
    let settings_json: String = row.get(2)?;
    let settings = serde_json::from_str(&settings_json).map_err(|_| {
        rusqlite::Error::InvalidColumnType(2, "settings".to_string(), rusqlite::types::Type::Text)
    })?;
    Ok(TypingSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        settings,
        target_text: row.get(3)?,
        created_at: from_ts(&row.get::<_, String>(4)?)?,
        started_at: from_ts(&row.get::<_, String>(5)?)?,
        last_heartbeat_at: from_ts(&row.get::<_, String>(6)?)?,
        heartbeat_count: row.get(7)?,
        last_typed_length: row.get(8)?,
        max_burst_chars: row.get(9)?,
        max_burst_cps: row.get(10)?,
    })
}
