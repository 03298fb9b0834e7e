//! Achievement evaluation and reconciliation.
//!
//! One rule-evaluation path (`should_have`) serves both the incremental
//! check at finalize and the full reconciliation after a deletion, so the
//! two can never drift apart.

pub mod classification;
pub mod rules;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, BTreeSet};

pub use classification::Classification;

use crate::db::{from_ts, to_ts};
use crate::error::Result;
use crate::localtime::LocalDayContext;
use crate::results::{self, TestResult};
use rules::{Metric, FAMILIES, STANDALONE};

/// Minimum-effort bar a result must meet to count toward gated
/// achievements: a 2-second, 3-word "test" must not farm cumulative counts.
pub fn gate_qualifies(result: &TestResult) -> bool {
    result.accuracy >= 90.0 && (result.duration_secs >= 30.0 || result.correct_words >= 50)
}

/// Stored achievements for a user: id -> first-earned timestamp.
pub fn get_map(conn: &Connection, user_id: i64) -> Result<BTreeMap<String, DateTime<Utc>>> {
    let mut stmt =
        conn.prepare("SELECT achievement_id, earned_at FROM achievements WHERE user_id = ?1")?;
    let rows = stmt.query_map([user_id], |row| {
        Ok((row.get::<_, String>(0)?, from_ts(&row.get::<_, String>(1)?)?))
    })?;
    let mut map = BTreeMap::new();
    for row in rows {
        let (id, at) = row?;
        map.insert(id, at);
    }
    Ok(map)
}

/// The complete set of achievement ids the user's valid history supports.
///
/// Gated rules see only qualifying results; exempt rules see every valid
/// result. The collection family is counted over the projected total:
/// everything this computation grants plus stored permanent ids (which
/// survive reconciliation even without remaining evidence).
fn should_have(
    valid: &[TestResult],
    stored: &BTreeMap<String, DateTime<Utc>>,
    class: &Classification,
    ctx: &LocalDayContext,
) -> BTreeSet<String> {
    let qualifying: Vec<TestResult> = valid
        .iter()
        .filter(|r| gate_qualifies(r))
        .cloned()
        .collect();

    let gated_metrics = rules::compute_metrics(&qualifying, ctx);
    let exempt_metrics = rules::compute_metrics(valid, ctx);

    let mut earned: BTreeSet<String> = BTreeSet::new();

    for family in FAMILIES {
        if family.metric == Metric::Collection {
            continue;
        }
        // Families are gated unless every tier id in them is exempt, which
        // the built-in table never does; per-tier exemption still works.
        for tier in family.tiers {
            let metrics = if class.is_exempt(tier.id) {
                &exempt_metrics
            } else {
                &gated_metrics
            };
            let Some(value) = metrics.value_of(family.metric) else {
                continue;
            };
            if tier.threshold <= value {
                earned.insert(tier.id.to_string());
            }
        }
    }

    for (id, predicate) in STANDALONE {
        let pool: &[TestResult] = if class.is_exempt(id) {
            valid
        } else {
            &qualifying
        };
        if predicate(pool, ctx) {
            earned.insert((*id).to_string());
        }
    }

    // Collection tiers: projected total of everything else.
    let collection_family = FAMILIES.iter().find(|f| f.metric == Metric::Collection);
    if let Some(family) = collection_family {
        let retained_permanents = stored
            .keys()
            .filter(|id| class.is_permanent(id) && !earned.contains(*id))
            .count();
        let projected = earned.len() + retained_permanents;
        let ids: Vec<_> = rules::qualified_tiers(family, projected as f64).collect();
        for id in ids {
            earned.insert(id.to_string());
        }
    }

    earned
}

/// Incremental check after a valid result lands. Grants every
/// newly-qualified id at `ctx.now` and returns them, sorted.
pub fn evaluate_on_finalize(
    conn: &Connection,
    user_id: i64,
    class: &Classification,
    ctx: &LocalDayContext,
) -> Result<Vec<String>> {
    let valid = results::valid_for_user(conn, user_id)?;
    let stored = get_map(conn, user_id)?;
    let should = should_have(&valid, &stored, class, ctx);

    let mut granted = Vec::new();
    for id in &should {
        if !stored.contains_key(id) {
            grant(conn, user_id, id, ctx.now)?;
            granted.push(id.clone());
        }
    }
    if !granted.is_empty() {
        tracing::info!(user_id, granted = ?granted, "achievements granted");
    }
    Ok(granted)
}

/// Full reconciliation: recompute the should-have set from scratch, add
/// what is missing, and remove stored ids with no remaining evidence —
/// except permanent ones, which a later deletion cannot un-earn. Returns
/// (added, removed) for caller notification.
pub fn reconcile(
    conn: &Connection,
    user_id: i64,
    class: &Classification,
    ctx: &LocalDayContext,
) -> Result<(Vec<String>, Vec<String>)> {
    let valid = results::valid_for_user(conn, user_id)?;
    let stored = get_map(conn, user_id)?;
    let should = should_have(&valid, &stored, class, ctx);

    let mut added = Vec::new();
    for id in &should {
        if !stored.contains_key(id) {
            grant(conn, user_id, id, ctx.now)?;
            added.push(id.clone());
        }
    }

    let mut removed = Vec::new();
    for id in stored.keys() {
        if !should.contains(id) && !class.is_permanent(id) {
            conn.execute(
                "DELETE FROM achievements WHERE user_id = ?1 AND achievement_id = ?2",
                params![user_id, id],
            )?;
            removed.push(id.clone());
        }
    }

    if !added.is_empty() || !removed.is_empty() {
        tracing::info!(user_id, added = ?added, removed = ?removed, "achievements reconciled");
    }
    Ok((added, removed))
}

fn grant(conn: &Connection, user_id: i64, id: &str, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO achievements (user_id, achievement_id, earned_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(user_id, achievement_id) DO NOTHING
        "#,
        params![user_id, id, to_ts(at)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::test_support::quick_result;
    use crate::results::NewResult;
    use crate::session::{Difficulty, TestMode};
    use crate::{db, users};
    use chrono::{Duration, TimeZone};

    fn setup() -> (Connection, i64, LocalDayContext) {
        let conn = db::open_in_memory().unwrap();
        let user = users::ensure_user(&conn, "a", "ace", None, Utc::now()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        (conn, user.id, LocalDayContext::new(chrono_tz::UTC, now))
    }

    fn solid_result(user: i64, wpm: f64) -> NewResult {
        // Passes the gate: accuracy 95, duration 30s.
        quick_result(user, wpm, 95.0, true)
    }

    fn short_result(user: i64) -> NewResult {
        // Fails the gate: 5 seconds, 10 words.
        NewResult {
            duration_secs: 5.0,
            word_count: 10,
            correct_words: 10,
            accuracy: 100.0,
            ..quick_result(user, 55.0, 100.0, true)
        }
    }

    #[test]
    fn gate_bar() {
        let (conn, user, _) = setup();
        let long = results::insert(&conn, &solid_result(user, 60.0), Utc::now()).unwrap();
        assert!(gate_qualifies(&long));

        let short = results::insert(&conn, &short_result(user), Utc::now()).unwrap();
        assert!(!gate_qualifies(&short));

        // Short but wordy still qualifies.
        let wordy = results::insert(
            &conn,
            &NewResult {
                duration_secs: 20.0,
                correct_words: 60,
                ..solid_result(user, 90.0)
            },
            Utc::now(),
        )
        .unwrap();
        assert!(gate_qualifies(&wordy));

        let sloppy = results::insert(
            &conn,
            &NewResult {
                accuracy: 89.0,
                ..solid_result(user, 90.0)
            },
            Utc::now(),
        )
        .unwrap();
        assert!(!gate_qualifies(&sloppy));
    }

    #[test]
    fn first_valid_test_grants_first_test_and_speed_tiers() {
        let (conn, user, ctx) = setup();
        results::insert(&conn, &solid_result(user, 85.0), ctx.now).unwrap();
        let granted = evaluate_on_finalize(&conn, user, &Classification::default(), &ctx).unwrap();
        assert!(granted.contains(&"first_test".to_string()));
        assert!(granted.contains(&"speed_60".to_string()));
        assert!(granted.contains(&"speed_80".to_string()));
        assert!(!granted.contains(&"speed_100".to_string()));
    }

    #[test]
    fn short_test_earns_only_exempt_achievements() {
        let (conn, user, ctx) = setup();
        results::insert(&conn, &short_result(user), ctx.now).unwrap();
        let granted = evaluate_on_finalize(&conn, user, &Classification::default(), &ctx).unwrap();
        // first_test is exempt from the gate; speed tiers are not.
        assert!(granted.contains(&"first_test".to_string()));
        assert!(!granted.iter().any(|id| id.starts_with("speed_")));
        assert!(!granted.iter().any(|id| id.starts_with("words_")));
    }

    #[test]
    fn grants_are_not_repeated() {
        let (conn, user, ctx) = setup();
        results::insert(&conn, &solid_result(user, 85.0), ctx.now).unwrap();
        evaluate_on_finalize(&conn, user, &Classification::default(), &ctx).unwrap();
        let again = evaluate_on_finalize(&conn, user, &Classification::default(), &ctx).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn reconcile_removes_tier_without_evidence_but_keeps_permanents() {
        let (conn, user, ctx) = setup();
        let class = Classification::default();
        // One fast test at 03:00 local: earns speed_80 and night_owl.
        let night = Utc.with_ymd_and_hms(2026, 3, 9, 3, 0, 0).unwrap();
        let fast = results::insert(&conn, &solid_result(user, 85.0), night).unwrap();
        let slow_ctx = LocalDayContext::new(chrono_tz::UTC, night + Duration::hours(1));
        evaluate_on_finalize(&conn, user, &class, &slow_ctx).unwrap();
        // A second, slower test keeps the user's history non-empty.
        results::insert(&conn, &solid_result(user, 62.0), ctx.now).unwrap();

        results::delete_owned(&conn, fast.id, user).unwrap();
        let (_, removed) = reconcile(&conn, user, &class, &ctx).unwrap();

        assert!(removed.contains(&"speed_80".to_string()));
        let stored = get_map(&conn, user).unwrap();
        // The remaining 62wpm test still supports speed_60.
        assert!(stored.contains_key("speed_60"));
        // night_owl is permanent: the 03:00 moment happened.
        assert!(stored.contains_key("night_owl"));
    }

    #[test]
    fn reconcile_backfills_missing_ids() {
        let (conn, user, ctx) = setup();
        results::insert(&conn, &solid_result(user, 85.0), ctx.now).unwrap();
        // Nothing evaluated at finalize time (simulating drift).
        let (added, removed) = reconcile(&conn, user, &Classification::default(), &ctx).unwrap();
        assert!(added.contains(&"first_test".to_string()));
        assert!(added.contains(&"speed_80".to_string()));
        assert!(removed.is_empty());
    }

    #[test]
    fn collection_threshold_crossed_by_same_batch_fires_immediately() {
        let (conn, user, ctx) = setup();
        // A single strong first test yields first_test, speed_60/80,
        // weekend? no (Tuesday) - plus words? no. Build up enough grants by
        // making the test earn >= 5 ids at once: 100.0 wpm exact hits
        // exact_100, speed_60/80/100, first_test -> 5 ids, so collector_5
        // must land in the same batch.
        results::insert(&conn, &solid_result(user, 100.0), ctx.now).unwrap();
        let granted = evaluate_on_finalize(&conn, user, &Classification::default(), &ctx).unwrap();
        assert!(granted.contains(&"exact_100".to_string()));
        assert!(granted.contains(&"collector_5".to_string()));
    }

    #[test]
    fn unified_path_keeps_incremental_and_reconcile_agreeing() {
        let (conn, user, ctx) = setup();
        let class = Classification::default();
        for i in 0..12 {
            results::insert(
                &conn,
                &solid_result(user, 60.0 + i as f64),
                ctx.now - Duration::minutes(60 - i),
            )
            .unwrap();
        }
        evaluate_on_finalize(&conn, user, &class, &ctx).unwrap();
        let before = get_map(&conn, user).unwrap();
        let (added, removed) = reconcile(&conn, user, &class, &ctx).unwrap();
        assert!(added.is_empty());
        assert!(removed.is_empty());
        assert_eq!(before, get_map(&conn, user).unwrap());
    }

    #[test]
    fn hard_mode_needs_expert_punctuation_and_speed() {
        let (conn, user, ctx) = setup();
        results::insert(
            &conn,
            &NewResult {
                difficulty: Difficulty::Expert,
                punctuation: true,
                mode: TestMode::Words,
                word_count: 60,
                correct_words: 58,
                ..solid_result(user, 85.0)
            },
            ctx.now,
        )
        .unwrap();
        let granted = evaluate_on_finalize(&conn, user, &Classification::default(), &ctx).unwrap();
        assert!(granted.contains(&"hard_mode".to_string()));
    }
}
