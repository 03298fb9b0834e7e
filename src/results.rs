use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{from_ts, to_ts};
use crate::error::{EngineError, Result};
use crate::session::{Difficulty, TestMode};

/// One finalized, scored attempt. The single source of truth every cache is
/// derived from. Immutable once written; only ever removed whole.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub id: i64,
    pub user_id: i64,
    pub wpm: f64,
    /// 0–100, one decimal.
    pub accuracy: f64,
    pub mode: TestMode,
    pub duration_secs: f64,
    /// Whitespace-delimited words in the typed text.
    pub word_count: u32,
    pub correct_chars: u32,
    pub incorrect_chars: u32,
    pub correct_words: u32,
    pub difficulty: Difficulty,
    pub punctuation: bool,
    /// Anti-cheat verdict. Invalid rows are kept for user-visible history
    /// but excluded from every cache and from achievement evaluation.
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Attributes of a scored attempt about to be persisted.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub user_id: i64,
    pub wpm: f64,
    pub accuracy: f64,
    pub mode: TestMode,
    pub duration_secs: f64,
    pub word_count: u32,
    pub correct_chars: u32,
    pub incorrect_chars: u32,
    pub correct_words: u32,
    pub difficulty: Difficulty,
    pub punctuation: bool,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
}

pub fn insert(conn: &Connection, new: &NewResult, now: DateTime<Utc>) -> Result<TestResult> {
    // Normalize through the stored encoding so the in-memory row compares
    // equal to what a later read returns (timestamps are matched exactly
    // when reverting leaderboard entries).
    let now = from_ts(&to_ts(now))?;
    conn.execute(
        r#"
        INSERT INTO results
            (user_id, wpm, accuracy, mode, duration_secs, word_count,
             correct_chars, incorrect_chars, correct_words, difficulty,
             punctuation, is_valid, invalid_reason, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            new.user_id,
            new.wpm,
            new.accuracy,
            new.mode.to_string(),
            new.duration_secs,
            new.word_count,
            new.correct_chars,
            new.incorrect_chars,
            new.correct_words,
            new.difficulty.to_string(),
            new.punctuation,
            new.is_valid,
            new.invalid_reason,
            to_ts(now),
        ],
    )?;
    Ok(TestResult {
        id: conn.last_insert_rowid(),
        user_id: new.user_id,
        wpm: new.wpm,
        accuracy: new.accuracy,
        mode: new.mode,
        duration_secs: new.duration_secs,
        word_count: new.word_count,
        correct_chars: new.correct_chars,
        incorrect_chars: new.incorrect_chars,
        correct_words: new.correct_words,
        difficulty: new.difficulty,
        punctuation: new.punctuation,
        is_valid: new.is_valid,
        invalid_reason: new.invalid_reason.clone(),
        created_at: now,
    })
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<TestResult>> {
    let res = conn
        .query_row(&format!("{SELECT_RESULT} WHERE id = ?1"), [id], from_row)
        .optional()?;
    Ok(res)
}

/// Remove a row after an ownership check. The removed row is returned so the
/// cache maintainers can reverse its contribution in the same transaction.
/// Ownership mismatch is Forbidden, never NotFound.
pub fn delete_owned(conn: &Connection, id: i64, requesting_user: i64) -> Result<TestResult> {
    let row = get(conn, id)?.ok_or(EngineError::ResultNotFound(id))?;
    if row.user_id != requesting_user {
        return Err(EngineError::Forbidden {
            result_id: id,
            user_id: requesting_user,
        });
    }
    conn.execute("DELETE FROM results WHERE id = ?1", [id])?;
    Ok(row)
}

/// All of a user's valid results, oldest first. Achievement metrics and
/// cache rebuilds iterate this.
pub fn valid_for_user(conn: &Connection, user_id: i64) -> Result<Vec<TestResult>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_RESULT} WHERE user_id = ?1 AND is_valid = 1 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map([user_id], from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Bounded recent history (valid and invalid), newest first.
pub fn recent_for_user(conn: &Connection, user_id: i64, limit: u32) -> Result<Vec<TestResult>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_RESULT} WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![user_id, limit], from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Leaderboard-eligible rows (valid, accuracy at or above the floor) at or
/// after `since`, across all users. Indexed range read on created_at.
pub fn eligible_since(
    conn: &Connection,
    min_accuracy: f64,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<TestResult>> {
    let since_ts = since.map(to_ts).unwrap_or_default();
    let mut stmt = conn.prepare(&format!(
        "{SELECT_RESULT} WHERE is_valid = 1 AND accuracy >= ?1 AND created_at >= ?2"
    ))?;
    let rows = stmt.query_map(params![min_accuracy, since_ts], from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// The user's best eligible result in a window, with its timestamp. Ties on
/// WPM resolve to the earliest achiever.
pub fn best_eligible_in_window(
    conn: &Connection,
    user_id: i64,
    min_accuracy: f64,
    since: Option<DateTime<Utc>>,
) -> Result<Option<(f64, DateTime<Utc>)>> {
    let since_ts = since.map(to_ts).unwrap_or_default();
    let row = conn
        .query_row(
            r#"
            SELECT wpm, created_at FROM results
            WHERE user_id = ?1 AND is_valid = 1 AND accuracy >= ?2 AND created_at >= ?3
            ORDER BY wpm DESC, created_at ASC
            LIMIT 1
            "#,
            params![user_id, min_accuracy, since_ts],
            |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    from_ts(&row.get::<_, String>(1)?)?,
                ))
            },
        )
        .optional()?;
    Ok(row)
}

const SELECT_RESULT: &str = r#"
    SELECT id, user_id, wpm, accuracy, mode, duration_secs, word_count,
           correct_chars, incorrect_chars, correct_words, difficulty,
           punctuation, is_valid, invalid_reason, created_at
    FROM results
"#;

fn from_row(row: &Row) -> rusqlite::Result<TestResult> {
    let mode: String = row.get(4)?;
    let difficulty: String = row.get(10)?;
    Ok(TestResult {
        id: row.get(0)?,
        user_id: row.get(1)?,
        wpm: row.get(2)?,
        accuracy: row.get(3)?,
        mode: mode.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(4, "mode".to_string(), rusqlite::types::Type::Text)
        })?,
        duration_secs: row.get(5)?,
        word_count: row.get(6)?,
        correct_chars: row.get(7)?,
        incorrect_chars: row.get(8)?,
        correct_words: row.get(9)?,
        difficulty: difficulty.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                10,
                "difficulty".to_string(),
                rusqlite::types::Type::Text,
            )
        })?,
        punctuation: row.get(11)?,
        is_valid: row.get(12)?,
        invalid_reason: row.get(13)?,
        created_at: from_ts(&row.get::<_, String>(14)?)?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Shorthand for building result rows in tests.
    pub fn quick_result(user_id: i64, wpm: f64, accuracy: f64, valid: bool) -> NewResult {
        NewResult {
            user_id,
            wpm,
            accuracy,
            mode: TestMode::Time,
            duration_secs: 30.0,
            word_count: 40,
            correct_chars: 190,
            incorrect_chars: 10,
            correct_words: 38,
            difficulty: Difficulty::Normal,
            punctuation: false,
            is_valid: valid,
            invalid_reason: if valid {
                None
            } else {
                Some("speed exceeds ceiling".to_string())
            },
        }
    }
}
