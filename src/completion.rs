//! Weighted multi-signal completion detector (§4.5).
//!
//! Four independent signals are blended into one confidence score: pattern
//! recognition over recent output, recent file-system activity, an explicit
//! semantic-verification question sent to the agent, and elapsed task time.
//! None of the signals alone is trusted; the blend is what crosses the
//! configured threshold.

use crate::patterns;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy)]
pub struct SignalWeights {
    pub patterns: f64,
    pub file_activity: f64,
    pub verification: f64,
    pub time: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionSignals {
    pub pattern_score: f64,
    pub file_activity_score: f64,
    pub verification_score: f64,
    pub time_score: f64,
}

impl CompletionSignals {
    /// Weighted sum, clamped to `[0.0, 1.0]` (§3 invariant: confidence is
    /// always a valid probability-like score).
    pub fn overall(&self, weights: &SignalWeights) -> f64 {
        let raw = self.pattern_score * weights.patterns
            + self.file_activity_score * weights.file_activity
            + self.verification_score * weights.verification
            + self.time_score * weights.time;
        raw.clamp(0.0, 1.0)
    }
}

/// Pattern signal: 1.0 if a completion pattern matches the trailing output
/// and no working/still-working pattern contradicts it, 0.0 otherwise.
pub fn pattern_signal(recent_output: &str, extra_patterns: &[regex::Regex]) -> f64 {
    let lines = patterns::trailing_lines(recent_output).join("\n");
    if patterns::matches_completion(&lines, extra_patterns) && !patterns::matches_still_working(&lines) {
        1.0
    } else {
        0.0
    }
}

/// Pure formula behind the file-activity signal: `minutesSince / timeout`,
/// clamped to `[0.0, 1.0]`. `timeout_minutes` is the only input that affects
/// the score; a separate activity window is used only to count recently
/// touched files for reporting, never to floor this score.
pub fn activity_score(idle_minutes: f64, timeout_minutes: u64) -> f64 {
    (idle_minutes / timeout_minutes.max(1) as f64).clamp(0.0, 1.0)
}

/// File-activity signal: walks `project_dir` for the most recently modified
/// file (excluding `.git`) and scores how long it's been idle against
/// `timeout_minutes`. `window_minutes` only affects the `active_files` count
/// logged for operators, matching the original's reporting-only window.
pub fn file_activity_signal(project_dir: &Path, window_minutes: u64, timeout_minutes: u64) -> f64 {
    let now = SystemTime::now();
    let mut most_recent: Option<SystemTime> = None;
    let mut active_files = 0usize;

    for entry in WalkDir::new(project_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || is_git_path(entry.path()) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        most_recent = Some(most_recent.map_or(modified, |m| m.max(modified)));
        if let Ok(age) = now.duration_since(modified) {
            if age.as_secs_f64() / 60.0 <= window_minutes as f64 {
                active_files += 1;
            }
        }
    }

    let Some(most_recent) = most_recent else {
        return 1.0;
    };
    let idle_minutes = now
        .duration_since(most_recent)
        .map(|d| d.as_secs_f64() / 60.0)
        .unwrap_or(0.0);
    tracing::debug!(active_files, idle_minutes, "file activity signal");
    activity_score(idle_minutes, timeout_minutes)
}

fn is_git_path(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == ".git")
}

/// Additive parse of a completion-verification reply (§4.5): every matching
/// completion pattern adds 0.3, every still-working indicator subtracts 0.4,
/// every direct-confirmation word adds 0.4, and the total is clamped to
/// `[0.0, 1.0]`. Returns the score and whether the reply ultimately reads as
/// a confirmation.
pub fn parse_verification_response(response: &str) -> (f64, bool) {
    if response.trim().is_empty() {
        return (0.0, false);
    }
    let lower = response.to_lowercase();
    let mut score = 0.0;
    let mut confirmed = false;

    let completion_hits = patterns::completion_pattern_hit_count(&lower);
    if completion_hits > 0 {
        score += 0.3 * completion_hits as f64;
        confirmed = true;
    }

    let working_hits = patterns::still_working_hit_count(&lower);
    if working_hits > 0 {
        score -= 0.4 * working_hits as f64;
        confirmed = false;
    }

    let confirmation_hits = patterns::direct_confirmation_hit_count(&lower);
    if confirmation_hits > 0 {
        score += 0.4 * confirmation_hits as f64;
        confirmed = true;
    }

    (score.clamp(0.0, 1.0), confirmed)
}

/// Time signal (§4.5): neutral 0.5 until a task has run past
/// `task_minimum_duration_secs`, then ramps from 0.5 to 1.0 over the same
/// span again — a task reported done right at the minimum is no more
/// trustworthy than one still inside it.
pub fn time_signal(task_started_at: Option<DateTime<Utc>>, task_minimum_duration_secs: u64) -> f64 {
    let Some(started) = task_started_at else {
        return 0.5;
    };
    let elapsed_minutes = (Utc::now() - started).num_seconds() as f64 / 60.0;
    let minimum_minutes = task_minimum_duration_secs as f64 / 60.0;
    if minimum_minutes <= 0.0 || elapsed_minutes <= minimum_minutes {
        return 0.5;
    }
    let factor = ((elapsed_minutes - minimum_minutes) / minimum_minutes).min(1.0);
    0.5 + factor * 0.5
}

/// Caches the last computed confidence so callers (the monitor loop) can
/// avoid recomputing the file-system walk on every poll tick.
#[derive(Debug, Clone, Copy)]
pub struct CachedConfidence {
    pub value: f64,
    pub computed_at: DateTime<Utc>,
}

pub fn is_stale(cache: Option<CachedConfidence>, max_age_secs: i64) -> bool {
    match cache {
        None => true,
        Some(c) => (Utc::now() - c.computed_at).num_seconds() >= max_age_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn overall_confidence_is_clamped_to_unit_interval() {
        let signals = CompletionSignals {
            pattern_score: 1.0,
            file_activity_score: 1.0,
            verification_score: 1.0,
            time_score: 1.0,
        };
        let weights = SignalWeights {
            patterns: 0.25,
            file_activity: 0.25,
            verification: 0.35,
            time: 0.15,
        };
        let overall = signals.overall(&weights);
        assert!((overall - 1.0).abs() < 1e-9);
        assert!(overall <= 1.0);
    }

    #[test]
    fn higher_weight_on_failing_signal_lowers_score_monotonically() {
        let signals = CompletionSignals {
            pattern_score: 0.0,
            file_activity_score: 1.0,
            verification_score: 1.0,
            time_score: 1.0,
        };
        let low_pattern_weight = SignalWeights {
            patterns: 0.1,
            file_activity: 0.3,
            verification: 0.3,
            time: 0.3,
        };
        let high_pattern_weight = SignalWeights {
            patterns: 0.7,
            file_activity: 0.1,
            verification: 0.1,
            time: 0.1,
        };
        assert!(signals.overall(&low_pattern_weight) > signals.overall(&high_pattern_weight));
    }

    #[test]
    fn pattern_signal_detects_completion_text() {
        assert_eq!(pattern_signal("All done, task completed.", &[]), 1.0);
        assert_eq!(pattern_signal("still implementing...", &[]), 0.0);
    }

    #[test]
    fn pattern_signal_still_working_overrides_completion_wording() {
        let output = "task completed but still working on edge cases";
        assert_eq!(pattern_signal(output, &[]), 0.0);
    }

    #[test]
    fn file_activity_signal_full_confidence_with_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let score = file_activity_signal(dir.path(), 15, 10);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn file_activity_signal_zero_confidence_for_fresh_write() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let score = file_activity_signal(dir.path(), 15, 30);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn activity_score_matches_spec_formula_not_window_floored() {
        // idle=7, timeout=10 must read 0.7, not 0.0 just because it's under
        // a 15-minute "activity window" — that window is reporting-only.
        assert!((activity_score(7.0, 10) - 0.7).abs() < 1e-9);
        assert_eq!(activity_score(20.0, 10), 1.0);
    }

    #[test]
    fn verification_response_scores_additively() {
        let (score, confirmed) = parse_verification_response("COMPLETED");
        assert!(score > 0.0);
        assert!(confirmed);

        let (score, confirmed) = parse_verification_response("still working on the last bit");
        assert_eq!(score, 0.0);
        assert!(!confirmed);

        let (score, _) = parse_verification_response("");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn verification_response_clamps_multiple_confirmations() {
        let (score, confirmed) = parse_verification_response(
            "Task completed. I've finished the implementation. All done, ready for review.",
        );
        assert_eq!(score, 1.0);
        assert!(confirmed);
    }

    #[test]
    fn time_signal_is_neutral_until_minimum_duration_elapses() {
        assert_eq!(time_signal(None, 600), 0.5);
        let just_started = Some(Utc::now());
        assert_eq!(time_signal(just_started, 600), 0.5);
    }

    #[test]
    fn cache_staleness_follows_max_age() {
        assert!(is_stale(None, 30));
        let fresh = CachedConfidence {
            value: 0.5,
            computed_at: Utc::now(),
        };
        assert!(!is_stale(Some(fresh), 30));
        sleep(Duration::from_millis(10));
        assert!(!is_stale(Some(fresh), 30));
    }
}
