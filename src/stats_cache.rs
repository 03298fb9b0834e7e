//! Per-user running aggregates, kept incrementally in sync with the results
//! table.
//!
//! INVARIANT: a cache row always equals an aggregation over that user's
//! valid results. Inserts apply in O(1); deletions revert in O(1) except
//! when the deleted row was the cached best WPM, where the second-best is
//! unknown and a bounded rescan is the only correct recovery.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::results::{self, TestResult};

#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub user_id: i64,
    pub test_count: i64,
    pub total_wpm: f64,
    pub best_wpm: f64,
    pub total_accuracy: f64,
    pub total_duration_secs: f64,
    pub total_words: i64,
}

impl UserStats {
    pub fn avg_wpm(&self) -> f64 {
        if self.test_count == 0 {
            0.0
        } else {
            self.total_wpm / self.test_count as f64
        }
    }

    pub fn avg_accuracy(&self) -> f64 {
        if self.test_count == 0 {
            0.0
        } else {
            self.total_accuracy / self.test_count as f64
        }
    }
}

pub fn get(conn: &Connection, user_id: i64) -> Result<Option<UserStats>> {
    let stats = conn
        .query_row(
            r#"
            SELECT user_id, test_count, total_wpm, best_wpm, total_accuracy,
                   total_duration_secs, total_words
            FROM stats_cache WHERE user_id = ?1
            "#,
            [user_id],
            from_row,
        )
        .optional()?;
    Ok(stats)
}

/// Fold one newly-inserted valid result into the cache. Creates the row on
/// the user's first valid result.
pub fn apply(conn: &Connection, result: &TestResult) -> Result<()> {
    debug_assert!(result.is_valid);
    let updated = conn.execute(
        r#"
        UPDATE stats_cache
        SET test_count = test_count + 1,
            total_wpm = total_wpm + ?1,
            best_wpm = MAX(best_wpm, ?1),
            total_accuracy = total_accuracy + ?2,
            total_duration_secs = total_duration_secs + ?3,
            total_words = total_words + ?4
        WHERE user_id = ?5
        "#,
        params![
            result.wpm,
            result.accuracy,
            result.duration_secs,
            result.word_count,
            result.user_id
        ],
    )?;
    if updated == 0 {
        conn.execute(
            r#"
            INSERT INTO stats_cache
                (user_id, test_count, total_wpm, best_wpm, total_accuracy,
                 total_duration_secs, total_words)
            VALUES (?1, 1, ?2, ?2, ?3, ?4, ?5)
            "#,
            params![
                result.user_id,
                result.wpm,
                result.accuracy,
                result.duration_secs,
                result.word_count
            ],
        )?;
    }
    Ok(())
}

/// Reverse a previously-applied result after its deletion.
///
/// The decrement is exact except for `best_wpm`: when the deleted row was
/// the best, the new maximum comes from a rescan of the remaining valid
/// rows. A count of zero drops the cache row entirely.
pub fn revert(conn: &Connection, removed: &TestResult) -> Result<()> {
    debug_assert!(removed.is_valid);
    let Some(stats) = get(conn, removed.user_id)? else {
        // Cache row missing means nothing was ever applied; nothing to undo.
        return Ok(());
    };

    if stats.test_count <= 1 {
        conn.execute(
            "DELETE FROM stats_cache WHERE user_id = ?1",
            [removed.user_id],
        )?;
        return Ok(());
    }

    let new_best = if removed.wpm >= stats.best_wpm {
        // The deleted row held the maximum; the second-best is unknown.
        conn.query_row(
            "SELECT MAX(wpm) FROM results WHERE user_id = ?1 AND is_valid = 1",
            [removed.user_id],
            |row| row.get::<_, Option<f64>>(0),
        )?
        .unwrap_or(0.0)
    } else {
        stats.best_wpm
    };

    conn.execute(
        r#"
        UPDATE stats_cache
        SET test_count = test_count - 1,
            total_wpm = total_wpm - ?1,
            best_wpm = ?2,
            total_accuracy = total_accuracy - ?3,
            total_duration_secs = total_duration_secs - ?4,
            total_words = total_words - ?5
        WHERE user_id = ?6
        "#,
        params![
            removed.wpm,
            new_best,
            removed.accuracy,
            removed.duration_secs,
            removed.word_count,
            removed.user_id
        ],
    )?;
    Ok(())
}

/// Migration/repair path: discard the cache row and recompute every
/// aggregate from the results table. Never used on the hot path.
pub fn rebuild(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute("DELETE FROM stats_cache WHERE user_id = ?1", [user_id])?;
    conn.execute(
        r#"
        INSERT INTO stats_cache
            (user_id, test_count, total_wpm, best_wpm, total_accuracy,
             total_duration_secs, total_words)
        SELECT user_id, COUNT(*), SUM(wpm), MAX(wpm), SUM(accuracy),
               SUM(duration_secs), SUM(word_count)
        FROM results
        WHERE user_id = ?1 AND is_valid = 1
        GROUP BY user_id
        "#,
        [user_id],
    )?;
    Ok(())
}

/// Recompute the aggregates from source rows and compare with the cache.
/// Diagnostic read-only check used by tests and the admin binary.
pub fn is_consistent(conn: &Connection, user_id: i64) -> Result<bool> {
    let cached = get(conn, user_id)?;
    let rows = results::valid_for_user(conn, user_id)?;
    match (cached, rows.is_empty()) {
        (None, true) => Ok(true),
        (None, false) | (Some(_), true) => Ok(false),
        (Some(cached), false) => {
            let count = rows.len() as i64;
            let total_wpm: f64 = rows.iter().map(|r| r.wpm).sum();
            let best: f64 = rows.iter().map(|r| r.wpm).fold(0.0, f64::max);
            let total_acc: f64 = rows.iter().map(|r| r.accuracy).sum();
            let total_dur: f64 = rows.iter().map(|r| r.duration_secs).sum();
            let total_words: i64 = rows.iter().map(|r| r.word_count as i64).sum();
            Ok(cached.test_count == count
                && (cached.total_wpm - total_wpm).abs() < 1e-6
                && (cached.best_wpm - best).abs() < 1e-6
                && (cached.total_accuracy - total_acc).abs() < 1e-6
                && (cached.total_duration_secs - total_dur).abs() < 1e-6
                && cached.total_words == total_words)
        }
    }
}

fn from_row(row: &Row) -> rusqlite::Result<UserStats> {
    Ok(UserStats {
        user_id: row.get(0)?,
        test_count: row.get(1)?,
        total_wpm: row.get(2)?,
        best_wpm: row.get(3)?,
        total_accuracy: row.get(4)?,
        total_duration_secs: row.get(5)?,
        total_words: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::test_support::quick_result;
    use crate::{db, users};
    use chrono::{Duration, Utc};

    fn setup() -> (Connection, i64) {
        let conn = db::open_in_memory().unwrap();
        let user = users::ensure_user(&conn, "s", "stat", None, Utc::now()).unwrap();
        (conn, user.id)
    }

    fn add(conn: &Connection, user: i64, wpm: f64, offset_secs: i64) -> TestResult {
        let r = results::insert(
            conn,
            &quick_result(user, wpm, 95.0, true),
            Utc::now() + Duration::seconds(offset_secs),
        )
        .unwrap();
        apply(conn, &r).unwrap();
        r
    }

    #[test]
    fn first_result_seeds_the_cache() {
        let (conn, user) = setup();
        add(&conn, user, 62.0, 0);
        let stats = get(&conn, user).unwrap().unwrap();
        assert_eq!(stats.test_count, 1);
        assert_eq!(stats.best_wpm, 62.0);
        assert_eq!(stats.avg_wpm(), 62.0);
        assert!(is_consistent(&conn, user).unwrap());
    }

    #[test]
    fn apply_accumulates_and_raises_best() {
        let (conn, user) = setup();
        add(&conn, user, 60.0, 0);
        add(&conn, user, 80.0, 1);
        add(&conn, user, 70.0, 2);
        let stats = get(&conn, user).unwrap().unwrap();
        assert_eq!(stats.test_count, 3);
        assert_eq!(stats.best_wpm, 80.0);
        assert_eq!(stats.avg_wpm(), 70.0);
        assert!(is_consistent(&conn, user).unwrap());
    }

    #[test]
    fn revert_non_best_is_exact() {
        let (conn, user) = setup();
        let low = add(&conn, user, 60.0, 0);
        add(&conn, user, 80.0, 1);
        results::delete_owned(&conn, low.id, user).unwrap();
        revert(&conn, &low).unwrap();
        let stats = get(&conn, user).unwrap().unwrap();
        assert_eq!(stats.test_count, 1);
        assert_eq!(stats.best_wpm, 80.0);
        assert!(is_consistent(&conn, user).unwrap());
    }

    #[test]
    fn revert_of_best_rescans_for_new_maximum() {
        let (conn, user) = setup();
        add(&conn, user, 60.0, 0);
        let best = add(&conn, user, 95.0, 1);
        add(&conn, user, 72.0, 2);
        results::delete_owned(&conn, best.id, user).unwrap();
        revert(&conn, &best).unwrap();
        let stats = get(&conn, user).unwrap().unwrap();
        assert_eq!(stats.best_wpm, 72.0);
        assert!(is_consistent(&conn, user).unwrap());
    }

    #[test]
    fn last_revert_drops_the_row() {
        let (conn, user) = setup();
        let only = add(&conn, user, 60.0, 0);
        results::delete_owned(&conn, only.id, user).unwrap();
        revert(&conn, &only).unwrap();
        assert!(get(&conn, user).unwrap().is_none());
        assert!(is_consistent(&conn, user).unwrap());
    }

    #[test]
    fn insert_then_delete_all_in_any_order_returns_to_empty() {
        let (conn, user) = setup();
        let a = add(&conn, user, 60.0, 0);
        let b = add(&conn, user, 90.0, 1);
        let c = add(&conn, user, 75.0, 2);
        // Delete best first, then the others out of insertion order.
        for r in [&b, &a, &c] {
            results::delete_owned(&conn, r.id, user).unwrap();
            revert(&conn, r).unwrap();
            assert!(is_consistent(&conn, user).unwrap());
        }
        assert!(get(&conn, user).unwrap().is_none());
    }

    #[test]
    fn rebuild_repairs_a_poisoned_cache() {
        let (conn, user) = setup();
        add(&conn, user, 60.0, 0);
        add(&conn, user, 80.0, 1);
        conn.execute(
            "UPDATE stats_cache SET best_wpm = 999, test_count = 42 WHERE user_id = ?1",
            [user],
        )
        .unwrap();
        assert!(!is_consistent(&conn, user).unwrap());
        rebuild(&conn, user).unwrap();
        assert!(is_consistent(&conn, user).unwrap());
        let stats = get(&conn, user).unwrap().unwrap();
        assert_eq!(stats.test_count, 2);
        assert_eq!(stats.best_wpm, 80.0);
    }

    #[test]
    fn rebuild_with_no_valid_results_leaves_no_row() {
        let (conn, user) = setup();
        let r = results::insert(&conn, &quick_result(user, 50.0, 95.0, false), Utc::now()).unwrap();
        assert!(!r.is_valid);
        rebuild(&conn, user).unwrap();
        assert!(get(&conn, user).unwrap().is_none());
    }
}
