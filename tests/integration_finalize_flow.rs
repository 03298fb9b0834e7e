use assert_matches::assert_matches;
use chrono::{Duration, TimeZone, Utc};

use typeproof::engine::{Clock, Engine, ManualClock};
use typeproof::error::EngineError;
use typeproof::leaderboard::{Window, ALL_WINDOWS};
use typeproof::localtime::LocalDayContext;
use typeproof::session::ExerciseSettings;

fn engine_at(clock: &ManualClock) -> Engine {
    Engine::open_in_memory()
        .unwrap()
        .with_clock(Box::new(clock.clone()))
}

fn ctx_utc(clock: &ManualClock) -> LocalDayContext {
    LocalDayContext::new(chrono_tz::UTC, clock.now())
}

#[test]
fn thirty_second_test_end_to_end() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
    let mut engine = engine_at(&clock);
    let user = engine.ensure_user("auth0|e2e", "eve", None).unwrap();

    // 150-char target; the typed text differs in 3 positions -> 98.0%.
    let target = "abcde ".repeat(25);
    let mut typed = target.clone();
    typed.replace_range(0..3, "xyz");

    let sess = engine
        .start_session(user.id, &ExerciseSettings::timed(30.0), &target)
        .unwrap();

    // Six progress heartbeats, 25 chars each, ~5 s apart.
    for i in 1..=6u32 {
        clock.advance(Duration::milliseconds(4933));
        assert!(engine.record_progress(sess.id, i * 25).unwrap());
    }

    let ctx = ctx_utc(&clock);
    let outcome = engine.finalize_session(sess.id, &typed, &ctx).unwrap();

    // (150/5) / (29.598/60) ~= 60.8
    assert!(outcome.is_valid, "reason: {:?}", outcome.invalid_reason);
    assert!((outcome.wpm - 60.8).abs() < 0.1);
    assert_eq!(outcome.accuracy, 98.0);
    assert_eq!(outcome.correct_chars, 147);
    assert_eq!(outcome.incorrect_chars, 3);

    // 29.6 s and 24 correct words is below the minimum-effort bar, so only
    // exempt achievements can fire here.
    assert!(outcome.new_achievements.contains(&"first_test".to_string()));
    assert!(!outcome.new_achievements.contains(&"speed_60".to_string()));

    // Stats cache seeded from this single result.
    let view = engine.get_user_stats(user.id).unwrap();
    let stats = view.stats.clone().unwrap();
    assert_eq!(stats.test_count, 1);
    assert!((stats.best_wpm - outcome.wpm).abs() < 1e-9);
    assert!(engine.stats_cache_consistent(user.id).unwrap());

    // Accuracy >= 90: listed in every leaderboard window.
    for window in ALL_WINDOWS {
        let board = engine.get_leaderboard(window, 10).unwrap();
        assert_eq!(board.len(), 1, "window {window}");
        assert_eq!(board[0].display_name, "eve");
    }

    // The session is consumed: further activity is soft/hard rejected.
    assert!(!engine.record_progress(sess.id, 160).unwrap());
    assert_matches!(
        engine.finalize_session(sess.id, &typed, &ctx),
        Err(EngineError::SessionNotFound(_))
    );

    // A full-length run clears the bar and unlocks the gated speed tier.
    let target2 = "abcde ".repeat(55); // 330 chars -> 66 wpm over 60 s
    let sess2 = engine
        .start_session(user.id, &ExerciseSettings::timed(60.0), &target2)
        .unwrap();
    clock.advance(Duration::seconds(60));
    let ctx2 = ctx_utc(&clock);
    let outcome2 = engine.finalize_session(sess2.id, &target2, &ctx2).unwrap();
    assert!(outcome2.is_valid);
    assert!((outcome2.wpm - 66.0).abs() < 0.01);
    assert!(outcome2.new_achievements.contains(&"speed_60".to_string()));

    let stats = engine.get_user_stats(user.id).unwrap().stats.unwrap();
    assert_eq!(stats.test_count, 2);
    assert!((stats.best_wpm - 66.0).abs() < 0.01);
    assert!(engine.stats_cache_consistent(user.id).unwrap());
}

#[test]
fn early_submission_is_stored_invalid_and_touches_no_cache() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
    let mut engine = engine_at(&clock);
    let user = engine.ensure_user("auth0|rush", "roy", None).unwrap();

    let sess = engine
        .start_session(user.id, &ExerciseSettings::words(50), "")
        .unwrap();
    for i in 1..=4u32 {
        clock.advance(Duration::seconds(2));
        engine.record_progress(sess.id, i * 10).unwrap();
    }

    let ctx = ctx_utc(&clock);
    let outcome = engine
        .finalize_session(sess.id, "only five words typed here", &ctx)
        .unwrap();

    assert!(!outcome.is_valid);
    assert!(outcome.invalid_reason.unwrap().contains("5 words of 50"));
    assert!(outcome.new_achievements.is_empty());

    // Invalid results stay visible in history but never reach a cache.
    let view = engine.get_user_stats(user.id).unwrap();
    assert!(view.stats.is_none());
    assert_eq!(view.recent.len(), 1);
    assert!(!view.recent[0].is_valid);
    assert!(engine.get_leaderboard(Window::AllTime, 10).unwrap().is_empty());
    assert!(engine.get_user_achievements(user.id).unwrap().is_empty());
}

#[test]
fn quote_session_is_invalid_until_typed_to_full_length() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
    let mut engine = engine_at(&clock);
    let user = engine.ensure_user("auth0|quote", "quin", None).unwrap();

    let target = "the quick brown fox jumps over the lazy dog"; // 43 chars
    let sess = engine
        .start_session(user.id, &ExerciseSettings::quote(), target)
        .unwrap();
    for i in 1..=3u32 {
        clock.advance(Duration::seconds(5));
        engine.record_progress(sess.id, i * 7).unwrap();
    }

    let ctx = ctx_utc(&clock);
    let outcome = engine
        .finalize_session(sess.id, "the quick brown fox j", &ctx)
        .unwrap();
    assert!(!outcome.is_valid);
    assert!(outcome
        .invalid_reason
        .unwrap()
        .contains("typed 21 chars of 43 expected"));

    // The full quote passes.
    let sess2 = engine
        .start_session(user.id, &ExerciseSettings::quote(), target)
        .unwrap();
    for i in 1..=4u32 {
        clock.advance(Duration::seconds(5));
        engine.record_progress(sess2.id, i * 11).unwrap();
    }
    let ctx2 = ctx_utc(&clock);
    let outcome2 = engine.finalize_session(sess2.id, target, &ctx2).unwrap();
    assert!(outcome2.is_valid, "reason: {:?}", outcome2.invalid_reason);
    assert_eq!(outcome2.accuracy, 100.0);
}

#[test]
fn pasted_burst_invalidates_even_at_modest_speed() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
    let mut engine = engine_at(&clock);
    let user = engine.ensure_user("auth0|paste", "pat", None).unwrap();

    let sess = engine
        .start_session(user.id, &ExerciseSettings::zen(), "")
        .unwrap();
    clock.advance(Duration::seconds(20));
    engine.record_progress(sess.id, 51).unwrap();
    for i in 1..=5u32 {
        clock.advance(Duration::seconds(8));
        engine.record_progress(sess.id, 51 + i * 5).unwrap();
    }

    let ctx = ctx_utc(&clock);
    let outcome = engine
        .finalize_session(sess.id, "a modest amount of text overall", &ctx)
        .unwrap();
    assert!(!outcome.is_valid);
    assert!(outcome.invalid_reason.unwrap().contains("paste"));
}

#[test]
fn reload_within_grace_resumes_after_it_replaces() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
    let engine = engine_at(&clock);
    let user = engine.ensure_user("auth0|reload", "rae", None).unwrap();

    let first = engine
        .start_session(user.id, &ExerciseSettings::timed(60.0), "target text")
        .unwrap();

    clock.advance(Duration::seconds(10));
    let resumed = engine
        .start_session(user.id, &ExerciseSettings::timed(60.0), "target text")
        .unwrap();
    assert_eq!(resumed.id, first.id);

    clock.advance(Duration::seconds(25)); // 35 s after start: grace expired
    let replaced = engine
        .start_session(user.id, &ExerciseSettings::timed(60.0), "target text")
        .unwrap();
    assert_ne!(replaced.id, first.id);

    // Cancelling twice is fine.
    engine.cancel_session(replaced.id).unwrap();
    engine.cancel_session(replaced.id).unwrap();
}

#[test]
fn unknown_user_cannot_start() {
    let clock = ManualClock::new(Utc::now());
    let engine = engine_at(&clock);
    assert_matches!(
        engine.start_session(42, &ExerciseSettings::zen(), ""),
        Err(EngineError::UserNotFound(42))
    );
}
