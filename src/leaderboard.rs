//! Time-windowed best-WPM leaderboards.
//!
//! Two halves with different trust models. The per-user cache rows are
//! maintained incrementally (upsert on valid results, revert on deletion,
//! daily pruning) and back fast "your best this week" lookups. The ranked
//! cross-user *read* never trusts the cache: it recomputes live from the
//! results table per request, which eliminates cross-user invalidation bugs
//! at the cost of a small indexed scan per user.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::config::ValidationConfig;
use crate::db::{from_ts, to_ts};
use crate::error::Result;
use crate::localtime::{utc_day_start, utc_week_start};
use crate::results::{self, TestResult};
use crate::users::User;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString, clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
pub enum Window {
    #[strum(serialize = "alltime")]
    AllTime,
    Week,
    Today,
}

pub const ALL_WINDOWS: [Window; 3] = [Window::AllTime, Window::Week, Window::Today];

impl Window {
    /// Inclusive lower bound of the window, None for all-time. Windows are
    /// UTC-calendar based so every user ranks against one shared boundary.
    pub fn start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Window::AllTime => None,
            Window::Week => Some(utc_week_start(now)),
            Window::Today => Some(utc_day_start(now)),
        }
    }

    pub fn contains(self, instant: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.start(now) {
            None => true,
            Some(start) => instant >= start,
        }
    }
}

/// Cached per-user best within one window, with denormalized display fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub user_id: i64,
    pub window: Window,
    pub best_wpm: f64,
    pub best_wpm_at: DateTime<Utc>,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// One row of a ranked leaderboard read.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub rank: u32,
    pub user_id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub wpm: f64,
    pub achieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneCounts {
    pub today: usize,
    pub week: usize,
}

pub fn get_entry(conn: &Connection, user_id: i64, window: Window) -> Result<Option<CacheEntry>> {
    let entry = conn
        .query_row(
            r#"
            SELECT user_id, window, best_wpm, best_wpm_at, display_name, avatar_url
            FROM leaderboard_cache WHERE user_id = ?1 AND window = ?2
            "#,
            params![user_id, window.to_string()],
            from_row,
        )
        .optional()?;
    Ok(entry)
}

/// Fold a new valid result into each window's cache entry. Ineligible
/// results (below the accuracy floor) never touch any window.
pub fn apply(
    conn: &Connection,
    cfg: &ValidationConfig,
    result: &TestResult,
    user: &User,
) -> Result<()> {
    debug_assert!(result.is_valid);
    if result.accuracy < cfg.leaderboard_min_accuracy {
        return Ok(());
    }
    for window in ALL_WINDOWS {
        // An entry whose best has aged out of the window is dead weight
        // awaiting the prune job; it must not mask a new in-window result.
        let beats = match get_entry(conn, result.user_id, window)? {
            Some(entry) if !window.contains(entry.best_wpm_at, result.created_at) => true,
            Some(entry) => result.wpm > entry.best_wpm,
            None => true,
        };
        if beats {
            upsert(conn, result.user_id, window, result.wpm, result.created_at, user)?;
        }
    }
    Ok(())
}

/// Reverse a deleted result's contribution. Only an entry whose cached best
/// matches the removed row on BOTH wpm and timestamp is affected (the pair
/// disambiguates ties); it is then recomputed from the remaining eligible
/// rows, or dropped when none remain.
pub fn revert(
    conn: &Connection,
    cfg: &ValidationConfig,
    removed: &TestResult,
    now: DateTime<Utc>,
) -> Result<()> {
    if removed.accuracy < cfg.leaderboard_min_accuracy {
        return Ok(());
    }
    for window in ALL_WINDOWS {
        let Some(entry) = get_entry(conn, removed.user_id, window)? else {
            continue;
        };
        if entry.best_wpm != removed.wpm || entry.best_wpm_at != removed.created_at {
            continue;
        }
        match results::best_eligible_in_window(
            conn,
            removed.user_id,
            cfg.leaderboard_min_accuracy,
            window.start(now),
        )? {
            Some((wpm, at)) => {
                conn.execute(
                    r#"
                    UPDATE leaderboard_cache SET best_wpm = ?1, best_wpm_at = ?2
                    WHERE user_id = ?3 AND window = ?4
                    "#,
                    params![wpm, to_ts(at), removed.user_id, window.to_string()],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM leaderboard_cache WHERE user_id = ?1 AND window = ?2",
                    params![removed.user_id, window.to_string()],
                )?;
            }
        }
    }
    Ok(())
}

/// Scheduled daily job: drop Today/Week entries whose cached best has aged
/// out of the window. Entries go stale by the wall clock alone, independent
/// of any write, so this runs on a timer rather than on a mutation path.
pub fn prune_stale(conn: &Connection, now: DateTime<Utc>) -> Result<PruneCounts> {
    let mut counts = PruneCounts::default();
    for window in [Window::Today, Window::Week] {
        let Some(start) = window.start(now) else {
            continue;
        };
        let deleted = conn.execute(
            "DELETE FROM leaderboard_cache WHERE window = ?1 AND best_wpm_at < ?2",
            params![window.to_string(), to_ts(start)],
        )?;
        match window {
            Window::Today => counts.today = deleted,
            Window::Week => counts.week = deleted,
            Window::AllTime => {}
        }
    }
    tracing::debug!(today = counts.today, week = counts.week, "pruned stale leaderboard entries");
    Ok(counts)
}

/// Ranked read, recomputed live. Every user's eligible results inside the
/// window are scanned (indexed) and reduced to their best; ties rank the
/// earlier achiever first.
pub fn read(
    conn: &Connection,
    cfg: &ValidationConfig,
    window: Window,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<RankedEntry>> {
    let rows = results::eligible_since(conn, cfg.leaderboard_min_accuracy, window.start(now))?;

    let mut users: std::collections::HashMap<i64, User> = std::collections::HashMap::new();
    for row in &rows {
        if !users.contains_key(&row.user_id) {
            users.insert(row.user_id, crate::users::get_user(conn, row.user_id)?);
        }
    }

    let ranked = rows
        .into_iter()
        .map(|r| (r.user_id, r.wpm, r.created_at))
        .sorted_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.2.cmp(&b.2))
        })
        .chunk_by(|entry| entry.0)
        .into_iter()
        .filter_map(|(_, mut group)| group.next())
        .sorted_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        })
        .take(limit)
        .enumerate()
        .map(|(i, (user_id, wpm, achieved_at))| {
            let user = &users[&user_id];
            RankedEntry {
                rank: i as u32 + 1,
                user_id,
                display_name: user.display_name.clone(),
                avatar_url: user.avatar_url.clone(),
                wpm,
                achieved_at,
            }
        })
        .collect();

    Ok(ranked)
}

fn upsert(
    conn: &Connection,
    user_id: i64,
    window: Window,
    wpm: f64,
    at: DateTime<Utc>,
    user: &User,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO leaderboard_cache
            (user_id, window, best_wpm, best_wpm_at, display_name, avatar_url)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(user_id, window) DO UPDATE SET
            best_wpm = excluded.best_wpm,
            best_wpm_at = excluded.best_wpm_at,
            display_name = excluded.display_name,
            avatar_url = excluded.avatar_url
        "#,
        params![
            user_id,
            window.to_string(),
            wpm,
            to_ts(at),
            user.display_name,
            user.avatar_url
        ],
    )?;
    Ok(())
}

fn from_row(row: &Row) -> rusqlite::Result<CacheEntry> {
    let window: String = row.get(1)?;
    Ok(CacheEntry {
        user_id: row.get(0)?,
        window: window.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(1, "window".to_string(), rusqlite::types::Type::Text)
        })?,
        best_wpm: row.get(2)?,
        best_wpm_at: from_ts(&row.get::<_, String>(3)?)?,
        display_name: row.get(4)?,
        avatar_url: row.get(5)?,
    })
}
