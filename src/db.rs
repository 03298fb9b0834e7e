use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Open (or create) the engine database at an explicit path and apply the
/// schema.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                Some(format!("Failed to create directory: {}", e)),
            )
        })?;
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Open at the platform-local data directory for typeproof.
pub fn open_default() -> Result<Connection> {
    let path = default_db_path().unwrap_or_else(|| PathBuf::from("typeproof.db"));
    open(path)
}

/// In-memory database with the full schema, for tests.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn default_db_path() -> Option<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "typeproof") {
        Some(proj_dirs.data_local_dir().join("typeproof.db"))
    } else if let Ok(home) = std::env::var("HOME") {
        // Containers and stripped service environments where the dirs crate
        // cannot resolve a platform directory.
        Some(
            PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("typeproof")
                .join("typeproof.db"),
        )
    } else {
        None
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            auth_subject TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            avatar_url TEXT,
            timezone TEXT NOT NULL DEFAULT 'UTC',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            settings TEXT NOT NULL,
            target_text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT NOT NULL,
            last_heartbeat_at TEXT NOT NULL,
            heartbeat_count INTEGER NOT NULL DEFAULT 0,
            last_typed_length INTEGER NOT NULL DEFAULT 0,
            max_burst_chars INTEGER NOT NULL DEFAULT 0,
            max_burst_cps REAL NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

        CREATE TABLE IF NOT EXISTS results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            wpm REAL NOT NULL,
            accuracy REAL NOT NULL,
            mode TEXT NOT NULL,
            duration_secs REAL NOT NULL,
            word_count INTEGER NOT NULL,
            correct_chars INTEGER NOT NULL,
            incorrect_chars INTEGER NOT NULL,
            correct_words INTEGER NOT NULL,
            difficulty TEXT NOT NULL,
            punctuation INTEGER NOT NULL DEFAULT 0,
            is_valid INTEGER NOT NULL,
            invalid_reason TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_results_user ON results(user_id);
        CREATE INDEX IF NOT EXISTS idx_results_user_time ON results(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_results_time ON results(created_at);

        CREATE TABLE IF NOT EXISTS stats_cache (
            user_id INTEGER PRIMARY KEY REFERENCES users(id),
            test_count INTEGER NOT NULL,
            total_wpm REAL NOT NULL,
            best_wpm REAL NOT NULL,
            total_accuracy REAL NOT NULL,
            total_duration_secs REAL NOT NULL,
            total_words INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS leaderboard_cache (
            user_id INTEGER NOT NULL REFERENCES users(id),
            window TEXT NOT NULL,
            best_wpm REAL NOT NULL,
            best_wpm_at TEXT NOT NULL,
            display_name TEXT NOT NULL,
            avatar_url TEXT,
            PRIMARY KEY (user_id, window)
        );
        CREATE INDEX IF NOT EXISTS idx_leaderboard_window ON leaderboard_cache(window, best_wpm_at);

        CREATE TABLE IF NOT EXISTS achievements (
            user_id INTEGER NOT NULL REFERENCES users(id),
            achievement_id TEXT NOT NULL,
            earned_at TEXT NOT NULL,
            PRIMARY KEY (user_id, achievement_id)
        );
        "#,
    )
}

/// Uniform timestamp encoding. Microsecond precision with a `Z` suffix keeps
/// stored values lexicographically ordered, so indexed TEXT range scans on
/// `created_at` behave like time-range scans.
pub fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "timestamp".to_string(), rusqlite::types::Type::Text)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'results'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state").join("engine.db");
        let conn = open(&path).unwrap();
        drop(conn);
        assert!(path.exists());
    }

    #[test]
    fn default_path_points_at_the_db_file() {
        let path = default_db_path().unwrap();
        assert!(path.ends_with("typeproof.db"));
    }

    #[test]
    fn timestamps_round_trip_and_sort_as_text() {
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap();
        assert_eq!(from_ts(&to_ts(a)).unwrap(), a);
        assert!(to_ts(a) < to_ts(b));
    }
}
