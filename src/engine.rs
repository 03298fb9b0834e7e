//! Orchestration layer: ties the session tracker, validator, result store,
//! cache maintainers, and achievement engine together under explicit
//! transaction boundaries.
//!
//! FinalizeSession and DeleteResult each run as ONE store transaction:
//! a result is never persisted without its cache and achievement side
//! effects landing in the same commit, which is what keeps every cache
//! equal to a recomputation from source rows.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::achievements::{self, Classification};
use crate::anticheat::{self, Telemetry};
use crate::config::ValidationConfig;
use crate::error::{EngineError, Result};
use crate::leaderboard::{self, PruneCounts, RankedEntry, Window};
use crate::localtime::LocalDayContext;
use crate::results::{self, NewResult, TestResult};
use crate::session::{self, ExerciseSettings, TypingSession};
use crate::stats_cache::{self, UserStats};
use crate::users::{self, User};
use crate::util::count_words;

/// Wall-clock seam. Production uses [`SystemClock`]; tests drive a
/// [`ManualClock`] to cross grace windows and leaderboard boundaries
/// without sleeping.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = to;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.0.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.0.lock().map(|g| *g).unwrap_or_else(|_| Utc::now())
    }
}

/// Outcome of finalizing a session: the authoritative score, the verdict,
/// and any achievements the attempt unlocked.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeOutcome {
    pub result_id: i64,
    pub wpm: f64,
    pub accuracy: f64,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub correct_chars: u32,
    pub incorrect_chars: u32,
    pub correct_words: u32,
    pub new_achievements: Vec<String>,
}

/// Outcome of deleting a result: which achievements the reconciliation
/// removed (and any it backfilled).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOutcome {
    pub removed_achievements: Vec<String>,
    pub added_achievements: Vec<String>,
}

/// Cached aggregate plus bounded recent history. Users without a cache row
/// get the empty default, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStatsView {
    pub stats: Option<UserStats>,
    pub recent: Vec<TestResult>,
}

/// A pre-scored attempt arriving from a trusted server-side path (e.g. the
/// multiplayer room host), bypassing session tracking but not cache or
/// achievement maintenance.
#[derive(Debug, Clone)]
pub struct ScoredAttempt {
    pub settings: ExerciseSettings,
    pub wpm: f64,
    pub accuracy: f64,
    pub duration_secs: f64,
    pub word_count: u32,
    pub correct_chars: u32,
    pub incorrect_chars: u32,
    pub correct_words: u32,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
}

const RECENT_HISTORY_LIMIT: u32 = 10;

pub struct Engine {
    conn: Connection,
    config: ValidationConfig,
    classification: Classification,
    clock: Box<dyn Clock>,
}

impl Engine {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(crate::db::open(path)?))
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::db::open_default()?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(crate::db::open_in_memory()?))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            config: ValidationConfig::default(),
            classification: Classification::default(),
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: ValidationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    // --- identity -----------------------------------------------------

    pub fn ensure_user(
        &self,
        auth_subject: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<User> {
        users::ensure_user(
            &self.conn,
            auth_subject,
            display_name,
            avatar_url,
            self.clock.now(),
        )
    }

    pub fn get_user(&self, user_id: i64) -> Result<User> {
        users::get_user(&self.conn, user_id)
    }

    pub fn set_timezone(&self, user_id: i64, timezone: &str) -> Result<()> {
        users::set_timezone(&self.conn, user_id, timezone)
    }

    // --- session lifecycle --------------------------------------------

    /// Start (or resume) the user's typing session.
    pub fn start_session(
        &self,
        user_id: i64,
        settings: &ExerciseSettings,
        target_text: &str,
    ) -> Result<TypingSession> {
        users::get_user(&self.conn, user_id)?;
        session::start(
            &self.conn,
            &self.config,
            user_id,
            settings,
            target_text,
            self.clock.now(),
        )
    }

    /// Progress heartbeat. `Ok(false)` when the session is gone; never a
    /// hard failure.
    pub fn record_progress(&self, session_id: i64, typed_length: u32) -> Result<bool> {
        session::record_progress(&self.conn, session_id, typed_length, self.clock.now())
    }

    /// Cancel unconditionally; idempotent.
    pub fn cancel_session(&self, session_id: i64) -> Result<()> {
        session::delete(&self.conn, session_id)
    }

    /// Score the attempt, persist the result with its verdict, update every
    /// derived cache (valid results only), and discard the session — all in
    /// one transaction.
    pub fn finalize_session(
        &mut self,
        session_id: i64,
        typed_text: &str,
        ctx: &LocalDayContext,
    ) -> Result<FinalizeOutcome> {
        let now = self.clock.now();
        let tx = self.conn.transaction()?;

        let sess = session::get(&tx, session_id)?
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let elapsed_secs = (now - sess.started_at).num_milliseconds() as f64 / 1000.0;
        let telemetry = Telemetry {
            heartbeat_count: sess.heartbeat_count,
            max_burst_chars: sess.max_burst_chars,
            elapsed_secs,
        };
        let grade = anticheat::grade(typed_text, &sess.target_text);
        let wpm = anticheat::compute_wpm(typed_text.chars().count(), elapsed_secs);

        let mut verdict =
            anticheat::validate(&self.config, &sess.settings, telemetry, typed_text, wpm);
        if sess.settings.mode == crate::session::TestMode::Quote {
            if let Some(reason) = anticheat::check_quote_completion(typed_text, &sess.target_text)
            {
                verdict.is_valid = false;
                verdict.reasons.push(reason);
            }
        }

        let new = NewResult {
            user_id: sess.user_id,
            wpm,
            accuracy: grade.accuracy,
            mode: sess.settings.mode,
            duration_secs: elapsed_secs,
            word_count: count_words(typed_text) as u32,
            correct_chars: grade.correct_chars,
            incorrect_chars: grade.incorrect_chars,
            correct_words: grade.correct_words,
            difficulty: sess.settings.difficulty,
            punctuation: sess.settings.punctuation,
            is_valid: verdict.is_valid,
            invalid_reason: verdict.reason_text(),
        };
        let result = results::insert(&tx, &new, now)?;

        let new_achievements = if result.is_valid {
            let user = users::get_user(&tx, sess.user_id)?;
            stats_cache::apply(&tx, &result)?;
            leaderboard::apply(&tx, &self.config, &result, &user)?;
            achievements::evaluate_on_finalize(&tx, sess.user_id, &self.classification, ctx)?
        } else {
            Vec::new()
        };

        session::delete(&tx, session_id)?;
        tx.commit()?;

        tracing::info!(
            session_id,
            result_id = result.id,
            user_id = result.user_id,
            wpm = result.wpm,
            accuracy = result.accuracy,
            is_valid = result.is_valid,
            "session finalized"
        );

        Ok(FinalizeOutcome {
            result_id: result.id,
            wpm: result.wpm,
            accuracy: result.accuracy,
            is_valid: result.is_valid,
            invalid_reason: result.invalid_reason,
            correct_chars: result.correct_chars,
            incorrect_chars: result.incorrect_chars,
            correct_words: result.correct_words,
            new_achievements,
        })
    }

    // --- results ------------------------------------------------------

    /// Persist an already-scored attempt from a trusted path. Same cache
    /// and achievement side effects as finalize, same single transaction.
    pub fn save_result(
        &mut self,
        user_id: i64,
        attempt: &ScoredAttempt,
    ) -> Result<(i64, Vec<String>)> {
        let now = self.clock.now();
        let tx = self.conn.transaction()?;
        let user = users::get_user(&tx, user_id)?;
        let ctx = LocalDayContext::from_tz_name(&user.timezone, now)?;

        let new = NewResult {
            user_id,
            wpm: attempt.wpm,
            accuracy: attempt.accuracy,
            mode: attempt.settings.mode,
            duration_secs: attempt.duration_secs,
            word_count: attempt.word_count,
            correct_chars: attempt.correct_chars,
            incorrect_chars: attempt.incorrect_chars,
            correct_words: attempt.correct_words,
            difficulty: attempt.settings.difficulty,
            punctuation: attempt.settings.punctuation,
            is_valid: attempt.is_valid,
            invalid_reason: attempt.invalid_reason.clone(),
        };
        let result = results::insert(&tx, &new, now)?;

        let new_achievements = if result.is_valid {
            stats_cache::apply(&tx, &result)?;
            leaderboard::apply(&tx, &self.config, &result, &user)?;
            achievements::evaluate_on_finalize(&tx, user_id, &self.classification, &ctx)?
        } else {
            Vec::new()
        };
        tx.commit()?;

        tracing::info!(result_id = result.id, user_id, "scored result saved");
        Ok((result.id, new_achievements))
    }

    /// Delete one result and reverse its cache and achievement effects in
    /// the same transaction. Forbidden when the requester does not own it.
    pub fn delete_result(&mut self, result_id: i64, requesting_user: i64) -> Result<DeleteOutcome> {
        let now = self.clock.now();
        let tx = self.conn.transaction()?;

        let removed = results::delete_owned(&tx, result_id, requesting_user)?;

        let outcome = if removed.is_valid {
            stats_cache::revert(&tx, &removed)?;
            leaderboard::revert(&tx, &self.config, &removed, now)?;
            let user = users::get_user(&tx, requesting_user)?;
            let ctx = LocalDayContext::from_tz_name(&user.timezone, now)?;
            let (added, removed_ids) =
                achievements::reconcile(&tx, requesting_user, &self.classification, &ctx)?;
            DeleteOutcome {
                removed_achievements: removed_ids,
                added_achievements: added,
            }
        } else {
            DeleteOutcome::default()
        };
        tx.commit()?;

        tracing::info!(result_id, user_id = requesting_user, "result deleted");
        Ok(outcome)
    }

    // --- reads --------------------------------------------------------

    pub fn get_user_stats(&self, user_id: i64) -> Result<UserStatsView> {
        Ok(UserStatsView {
            stats: stats_cache::get(&self.conn, user_id)?,
            recent: results::recent_for_user(&self.conn, user_id, RECENT_HISTORY_LIMIT)?,
        })
    }

    pub fn get_leaderboard(&self, window: Window, limit: usize) -> Result<Vec<RankedEntry>> {
        leaderboard::read(&self.conn, &self.config, window, limit, self.clock.now())
    }

    pub fn get_user_achievements(
        &self,
        user_id: i64,
    ) -> Result<std::collections::BTreeMap<String, DateTime<Utc>>> {
        achievements::get_map(&self.conn, user_id)
    }

    // --- maintenance --------------------------------------------------

    /// User-triggered (or post-incident) achievement recheck.
    pub fn recheck_achievements(&mut self, user_id: i64) -> Result<(Vec<String>, Vec<String>)> {
        let now = self.clock.now();
        let tx = self.conn.transaction()?;
        let user = users::get_user(&tx, user_id)?;
        let ctx = LocalDayContext::from_tz_name(&user.timezone, now)?;
        let diff = achievements::reconcile(&tx, user_id, &self.classification, &ctx)?;
        tx.commit()?;
        Ok(diff)
    }

    /// Repair/backfill one user's stats cache from source rows.
    pub fn rebuild_stats(&self, user_id: i64) -> Result<()> {
        users::get_user(&self.conn, user_id)?;
        stats_cache::rebuild(&self.conn, user_id)
    }

    /// Scheduled daily job: drop leaderboard entries whose cached best has
    /// slid out of its window.
    pub fn prune_stale_leaderboard_entries(&self) -> Result<PruneCounts> {
        leaderboard::prune_stale(&self.conn, self.clock.now())
    }

    /// Diagnostic, read-only: does the user's cache equal a recomputation?
    pub fn stats_cache_consistent(&self, user_id: i64) -> Result<bool> {
        stats_cache::is_consistent(&self.conn, user_id)
    }
}
