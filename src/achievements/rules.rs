//! The achievement rule set: progressive tier families and standalone
//! conditions.
//!
//! Each family is a sorted `(threshold, id)` table; qualification for a
//! family is "every tier at or below the metric", found by a scan over a
//! short sorted list. Standalone conditions are boolean predicates over a
//! pool of results plus local-time context.

use chrono::Weekday;
use std::collections::BTreeSet;

use crate::localtime::LocalDayContext;
use crate::results::TestResult;
use crate::session::{Difficulty, TestMode};
use crate::util::{round1, std_dev};

/// Which metric a progressive family thresholds on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Cumulative correctly-typed words.
    Words,
    /// Best single-test WPM.
    BestWpm,
    /// Current streak of consecutive local days with a qualifying test.
    StreakDays,
    /// Qualifying tests completed.
    Tests,
    /// Cumulative minutes typed.
    Minutes,
    /// Trailing run of consecutive tests at >= 98% accuracy.
    AccuracyRun,
    /// Trailing run of tests whose WPM varies by at most 5 (std dev).
    ConsistencyRun,
    /// Times a test raised the personal-best WPM.
    PbImprovements,
    /// Qualifying tests completed on the current local day.
    SameDayTests,
    /// Distinct other achievements earned (evaluated against the projected
    /// total, so a threshold crossed by the same batch fires immediately).
    Collection,
}

#[derive(Debug, Clone, Copy)]
pub struct Tier {
    pub threshold: f64,
    pub id: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Family {
    pub metric: Metric,
    /// Ascending by threshold.
    pub tiers: &'static [Tier],
}

macro_rules! tiers {
    ($(($threshold:expr, $id:expr)),+ $(,)?) => {
        &[$(Tier { threshold: $threshold, id: $id }),+]
    };
}

pub static FAMILIES: &[Family] = &[
    Family {
        metric: Metric::Words,
        tiers: tiers![
            (1_000.0, "words_1k"),
            (10_000.0, "words_10k"),
            (100_000.0, "words_100k"),
            (1_000_000.0, "words_1m"),
        ],
    },
    Family {
        metric: Metric::BestWpm,
        tiers: tiers![
            (60.0, "speed_60"),
            (80.0, "speed_80"),
            (100.0, "speed_100"),
            (120.0, "speed_120"),
            (150.0, "speed_150"),
            (200.0, "speed_200"),
        ],
    },
    Family {
        metric: Metric::StreakDays,
        tiers: tiers![
            (3.0, "streak_3"),
            (7.0, "streak_7"),
            (30.0, "streak_30"),
            (90.0, "streak_90"),
            (365.0, "streak_365"),
        ],
    },
    Family {
        metric: Metric::Tests,
        tiers: tiers![
            (10.0, "tests_10"),
            (100.0, "tests_100"),
            (500.0, "tests_500"),
            (1_000.0, "tests_1000"),
        ],
    },
    Family {
        metric: Metric::Minutes,
        tiers: tiers![
            (60.0, "minutes_60"),
            (600.0, "minutes_600"),
            (6_000.0, "minutes_6000"),
        ],
    },
    Family {
        metric: Metric::AccuracyRun,
        tiers: tiers![
            (5.0, "sharpshooter_5"),
            (10.0, "sharpshooter_10"),
            (25.0, "sharpshooter_25"),
        ],
    },
    Family {
        metric: Metric::ConsistencyRun,
        tiers: tiers![
            (5.0, "metronome_5"),
            (10.0, "metronome_10"),
            (25.0, "metronome_25"),
        ],
    },
    Family {
        metric: Metric::PbImprovements,
        tiers: tiers![
            (5.0, "climber_5"),
            (10.0, "climber_10"),
            (25.0, "climber_25"),
        ],
    },
    Family {
        metric: Metric::SameDayTests,
        tiers: tiers![
            (10.0, "grinder_10"),
            (25.0, "grinder_25"),
            (50.0, "grinder_50"),
        ],
    },
    Family {
        metric: Metric::Collection,
        tiers: tiers![
            (5.0, "collector_5"),
            (15.0, "collector_15"),
            (30.0, "collector_30"),
        ],
    },
];

/// Ids of all tiers at or below the metric value.
pub fn qualified_tiers(family: &Family, value: f64) -> impl Iterator<Item = &'static str> + '_ {
    family
        .tiers
        .iter()
        .take_while(move |tier| tier.threshold <= value)
        .map(|tier| tier.id)
}

/// Every family metric computed from a result pool, oldest-first.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub total_words: f64,
    pub best_wpm: f64,
    pub streak_days: f64,
    pub tests: f64,
    pub minutes: f64,
    pub accuracy_run: f64,
    pub consistency_run: f64,
    pub pb_improvements: f64,
    pub same_day_tests: f64,
}

impl Metrics {
    pub fn value_of(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Words => Some(self.total_words),
            Metric::BestWpm => Some(self.best_wpm),
            Metric::StreakDays => Some(self.streak_days),
            Metric::Tests => Some(self.tests),
            Metric::Minutes => Some(self.minutes),
            Metric::AccuracyRun => Some(self.accuracy_run),
            Metric::ConsistencyRun => Some(self.consistency_run),
            Metric::PbImprovements => Some(self.pb_improvements),
            Metric::SameDayTests => Some(self.same_day_tests),
            // Counted over the achievement set, not over results.
            Metric::Collection => None,
        }
    }
}

pub fn compute_metrics(pool: &[TestResult], ctx: &LocalDayContext) -> Metrics {
    Metrics {
        total_words: pool.iter().map(|r| r.correct_words as f64).sum(),
        best_wpm: pool.iter().map(|r| r.wpm).fold(0.0, f64::max),
        streak_days: streak_days(pool, ctx) as f64,
        tests: pool.len() as f64,
        minutes: pool.iter().map(|r| r.duration_secs).sum::<f64>() / 60.0,
        accuracy_run: trailing_accuracy_run(pool) as f64,
        consistency_run: trailing_consistency_run(pool) as f64,
        pb_improvements: pb_improvements(pool) as f64,
        same_day_tests: pool
            .iter()
            .filter(|r| ctx.local_date_of(r.created_at) == ctx.local_date())
            .count() as f64,
    }
}

/// Consecutive local days with at least one test, counting back from today
/// (or yesterday, when today has no test yet — an unfinished day does not
/// break a streak).
fn streak_days(pool: &[TestResult], ctx: &LocalDayContext) -> usize {
    let mut days: Vec<_> = pool
        .iter()
        .map(|r| ctx.local_date_of(r.created_at))
        .collect();
    days.sort();
    days.dedup();

    let today = ctx.local_date();
    let yesterday = today.pred_opt().unwrap_or(today);
    let Some(&latest) = days.last() else {
        return 0;
    };
    if latest != today && latest != yesterday {
        return 0;
    }

    let mut streak = 1;
    for pair in days.windows(2).rev() {
        if pair[1].signed_duration_since(pair[0]).num_days() == 1 {
            streak += 1;
        } else {
            break;
        }
    }
    streak
}

fn trailing_accuracy_run(pool: &[TestResult]) -> usize {
    pool.iter().rev().take_while(|r| r.accuracy >= 98.0).count()
}

/// Longest suffix of the history whose WPM standard deviation stays within
/// 5 — a "low variance run" ending at the most recent test.
fn trailing_consistency_run(pool: &[TestResult]) -> usize {
    let wpms: Vec<f64> = pool.iter().map(|r| r.wpm).collect();
    let mut best = 0;
    for k in 1..=wpms.len() {
        let suffix = &wpms[wpms.len() - k..];
        if std_dev(suffix).unwrap_or(0.0) <= 5.0 {
            best = k;
        }
    }
    best
}

/// Number of tests that raised the running personal best (the first test
/// sets the baseline and does not count).
fn pb_improvements(pool: &[TestResult]) -> usize {
    let mut best: Option<f64> = None;
    let mut improvements = 0;
    for r in pool {
        match best {
            None => best = Some(r.wpm),
            Some(b) if r.wpm > b => {
                improvements += 1;
                best = Some(r.wpm);
            }
            _ => {}
        }
    }
    improvements
}

/// Standalone condition table: id plus a predicate over a result pool and
/// local-time context. Per-result conditions (time of day, holidays, exact
/// numbers) look at each result's own localized timestamp, so the same
/// predicate serves both the incremental and the full-history path.
pub static STANDALONE: &[(&str, fn(&[TestResult], &LocalDayContext) -> bool)] = &[
    ("first_test", |pool, _| !pool.is_empty()),
    ("night_owl", |pool, ctx| {
        pool.iter().any(|r| ctx.local_hour_of(r.created_at) < 4)
    }),
    ("early_bird", |pool, ctx| {
        pool.iter()
            .any(|r| (4..7).contains(&ctx.local_hour_of(r.created_at)))
    }),
    ("weekend_warrior", |pool, ctx| {
        pool.iter().any(|r| {
            matches!(
                ctx.local_weekday_of(r.created_at),
                Weekday::Sat | Weekday::Sun
            )
        })
    }),
    ("new_year", |pool, ctx| {
        pool.iter()
            .any(|r| ctx.local_month_day_of(r.created_at) == (1, 1))
    }),
    ("halloween", |pool, ctx| {
        pool.iter()
            .any(|r| ctx.local_month_day_of(r.created_at) == (10, 31))
    }),
    ("exact_100", |pool, _| {
        pool.iter().any(|r| round1(r.wpm) == 100.0)
    }),
    ("exact_42", |pool, _| {
        pool.iter().any(|r| round1(r.wpm) == 42.0)
    }),
    ("hard_mode", |pool, _| {
        pool.iter()
            .any(|r| r.difficulty == Difficulty::Expert && r.punctuation && r.wpm >= 80.0)
    }),
    ("all_rounder", |pool, _| {
        [TestMode::Time, TestMode::Words, TestMode::Quote]
            .iter()
            .all(|mode| pool.iter().any(|r| r.mode == *mode && r.wpm >= 80.0))
    }),
    ("perfectionist", |pool, _| {
        pool.iter().filter(|r| r.accuracy == 100.0).count() >= 10
    }),
    ("explorer", |pool, _| {
        let modes: BTreeSet<_> = pool.iter().map(|r| r.mode as u8).collect();
        modes.len() == 4
    }),
    ("endurance", |pool, _| {
        pool.iter().any(|r| r.duration_secs >= 600.0)
    }),
    ("pb_leap", |pool, _| {
        let mut best: Option<f64> = None;
        for r in pool {
            if let Some(b) = best {
                if r.wpm >= b + 20.0 {
                    return true;
                }
            }
            best = Some(best.unwrap_or(f64::MIN).max(r.wpm));
        }
        false
    }),
];
