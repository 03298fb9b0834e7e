//! Pure anti-cheat decision logic.
//!
//! Nothing here touches the store: the validator takes the telemetry a
//! session tracked, the server-measured elapsed time, and the final typed
//! text, recomputes speed and accuracy itself, and returns a verdict. A
//! client-reported WPM is never trusted.

use crate::config::ValidationConfig;
use crate::session::{ExerciseSettings, TestMode};
use crate::util::{count_words, round1};

/// Telemetry accumulated by the session tracker, plus the server-side
/// elapsed measurement taken at finalize.
#[derive(Debug, Clone, Copy)]
pub struct Telemetry {
    pub heartbeat_count: u32,
    pub max_burst_chars: u32,
    pub elapsed_secs: f64,
}

/// Anti-cheat verdict. Every violated check contributes a reason; one
/// violation is enough to invalidate the result, but all are reported for
/// diagnosability.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub is_valid: bool,
    pub reasons: Vec<String>,
}

impl Verdict {
    pub fn reason_text(&self) -> Option<String> {
        if self.reasons.is_empty() {
            None
        } else {
            Some(self.reasons.join("; "))
        }
    }
}

/// Authoritative speed recomputation: characters typed ÷ 5, per elapsed
/// minute. Zero when no time has elapsed.
pub fn compute_wpm(char_count: usize, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    (char_count as f64 / 5.0) / (elapsed_secs / 60.0)
}

/// Per-attempt correctness breakdown, recomputed from the typed text against
/// the target text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grade {
    /// 0–100, one decimal.
    pub accuracy: f64,
    pub correct_chars: u32,
    pub incorrect_chars: u32,
    pub correct_words: u32,
}

/// Position-wise comparison of typed text against the target. Characters
/// typed beyond the target count as incorrect. With no target (zen mode)
/// there is nothing to miss, so everything typed is correct.
pub fn grade(typed: &str, target: &str) -> Grade {
    let typed_chars: Vec<char> = typed.chars().collect();

    if target.is_empty() {
        return Grade {
            accuracy: 100.0,
            correct_chars: typed_chars.len() as u32,
            incorrect_chars: 0,
            correct_words: count_words(typed) as u32,
        };
    }

    let target_chars: Vec<char> = target.chars().collect();
    let mut correct = 0u32;
    for (i, c) in typed_chars.iter().enumerate() {
        if target_chars.get(i) == Some(c) {
            correct += 1;
        }
    }
    let incorrect = typed_chars.len() as u32 - correct;

    let accuracy = if typed_chars.is_empty() {
        0.0
    } else {
        round1(correct as f64 / typed_chars.len() as f64 * 100.0)
    };

    let correct_words = typed
        .split_whitespace()
        .zip(target.split_whitespace())
        .filter(|(a, b)| a == b)
        .count() as u32;

    Grade {
        accuracy,
        correct_chars: correct,
        incorrect_chars: incorrect,
        correct_words,
    }
}

/// Run every check and collect all violations.
///
/// Checks 1–3 catch automation and paste abuse independent of mode; check 4
/// catches early submission independent of typing speed.
pub fn validate(
    cfg: &ValidationConfig,
    settings: &ExerciseSettings,
    telemetry: Telemetry,
    typed_text: &str,
    wpm: f64,
) -> Verdict {
    let mut reasons = Vec::new();

    // 1. Minimum engagement. Time mode is exempt: its duration alone bounds
    //    effort.
    if settings.mode != TestMode::Time {
        let required = cfg
            .min_heartbeats
            .max((telemetry.elapsed_secs / cfg.heartbeat_interval_secs).floor() as u32);
        if telemetry.heartbeat_count < required {
            reasons.push(format!(
                "too few progress updates: {} recorded, {} required",
                telemetry.heartbeat_count, required
            ));
        }
    }

    // 2. Speed ceiling.
    if wpm > cfg.max_wpm {
        reasons.push(format!(
            "speed {:.1} wpm exceeds ceiling of {:.0} wpm",
            wpm, cfg.max_wpm
        ));
    }

    // 3. Burst/paste detection.
    if telemetry.max_burst_chars > cfg.max_burst_chars {
        reasons.push(format!(
            "burst of {} chars in one update exceeds paste threshold of {}",
            telemetry.max_burst_chars, cfg.max_burst_chars
        ));
    }

    // 4. Mode-specific completion, with tolerance.
    match settings.mode {
        TestMode::Time => {
            if let Some(target_secs) = settings.target_secs {
                let tolerance = cfg.time_tolerance_secs(target_secs);
                if telemetry.elapsed_secs < target_secs - tolerance {
                    reasons.push(format!(
                        "submitted after {:.1}s of a {:.0}s test (tolerance {:.1}s)",
                        telemetry.elapsed_secs, target_secs, tolerance
                    ));
                }
            }
        }
        TestMode::Words => {
            if let Some(target_words) = settings.target_words {
                let typed_words = count_words(typed_text);
                if typed_words < target_words {
                    reasons.push(format!(
                        "typed {} words of {} required",
                        typed_words, target_words
                    ));
                }
            }
        }
        TestMode::Quote => {
            // checked against the target text length by the caller-supplied
            // expectation below
        }
        TestMode::Zen => {}
    }

    Verdict {
        is_valid: reasons.is_empty(),
        reasons,
    }
}

/// Quote-mode completion is a property of the target text, which lives on
/// the session rather than in the settings; the orchestrator calls this
/// after `validate` and merges the verdicts.
pub fn check_quote_completion(typed_text: &str, target_text: &str) -> Option<String> {
    let typed_len = typed_text.chars().count();
    let target_len = target_text.chars().count();
    if typed_len < target_len {
        Some(format!(
            "typed {} chars of {} expected",
            typed_len, target_len
        ))
    } else {
        None
    }
}
