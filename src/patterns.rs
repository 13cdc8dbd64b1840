//! Pattern recognition over opaque agent terminal output.
//!
//! The agent channel gives us plain text, nothing structured. These regex
//! families are how the monitor infers whether an agent is busy, has
//! announced completion, or is hitting a transient backend error, mirroring
//! the pattern lists in the original Python agent manager almost verbatim.

use regex::RegexSet;
use std::sync::LazyLock;

/// Number of trailing non-empty lines inspected per check.
pub const TRAILING_LINES: usize = 20;

static WORKING_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\w+ing\.\.\.+",
        r"(?i)(thinking|processing|analyzing|creating|writing|building|implementing|working|compiling|testing|debugging|planning|designing|coding|executing)\.\.\.+",
        r"(?i)(in progress|working on|currently|please wait)",
        r"(?i)(step \d+|task \d+|phase \d+)",
        r"(?i)\.\.\.+\s*$",
    ])
    .expect("working patterns must compile")
});

static DEFAULT_COMPLETION_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)(task|work|implementation|project)\s+(completed|finished|done)",
        r"(?i)(i have|i've)\s+(completed|finished|done)",
        r"(?i)(ready for|completed|finished).*review",
        r"COMPLETED",
        r"(?i)(all|everything)\s+(is\s+)?(done|finished|completed)",
        r"(?i)(finished|completed|done)\s+(working|implementing|building)",
    ])
    .expect("completion patterns must compile")
});

static ERROR_PATTERNS: &[&str] = &[
    "api error",
    "rate limit",
    "too many requests",
    "failed to respond",
    "connection error",
    "timeout",
    "service unavailable",
];

static STILL_WORKING_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)(still|currently|now)\s+(working|implementing|building)",
        r"(?i)(in progress|working on|not.*done|not.*finished)",
        r"(?i)(need to|have to|going to)\s+(finish|complete|implement)",
        r"(?i)(almost|nearly|close to)\s+(done|finished|completed)",
    ])
    .expect("still-working patterns must compile")
});

static DIRECT_CONFIRMATION_TOKENS: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)(^|\s)(completed|finished|done|ready)\b").expect("must compile")
});

/// Returns the last `TRAILING_LINES` non-empty lines of `output`, in order.
pub fn trailing_lines(output: &str) -> Vec<&str> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .rev()
        .take(TRAILING_LINES)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

pub fn matches_working(text: &str) -> bool {
    WORKING_PATTERNS.is_match(text)
}

/// `extra` are the configured `semantic_completion_patterns` appended to the
/// built-in defaults.
pub fn matches_completion(text: &str, extra: &[regex::Regex]) -> bool {
    if DEFAULT_COMPLETION_PATTERNS.is_match(text) {
        return true;
    }
    extra.iter().any(|re| re.is_match(text))
}

pub fn matches_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

pub fn matches_still_working(text: &str) -> bool {
    STILL_WORKING_PATTERNS.is_match(text)
}

pub fn matches_direct_confirmation(text: &str) -> bool {
    DIRECT_CONFIRMATION_TOKENS.is_match(text)
}

/// How many distinct completion patterns match `text` — used by the
/// verification-response scorer, where each matching pattern adds its own
/// share of confidence rather than the check collapsing to a bool.
pub fn completion_pattern_hit_count(text: &str) -> usize {
    DEFAULT_COMPLETION_PATTERNS.matches(text).into_iter().count()
}

/// How many distinct still-working indicators match `text`.
pub fn still_working_hit_count(text: &str) -> usize {
    STILL_WORKING_PATTERNS.matches(text).into_iter().count()
}

static DIRECT_CONFIRMATION_WORDS: &[&str] = &["completed", "finished", "done", "ready"];

/// How many of the direct-confirmation words appear as their own word (either
/// preceded by whitespace or starting the text), counted independently so
/// "all done, ready for review" contributes twice.
pub fn direct_confirmation_hit_count(text: &str) -> usize {
    let lower = text.to_lowercase();
    DIRECT_CONFIRMATION_WORDS
        .iter()
        .filter(|word| lower.contains(&format!(" {word}")) || lower.starts_with(*word))
        .count()
}

/// Compile the operator-configured extra completion patterns once; invalid
/// patterns are dropped rather than failing the whole check (completion
/// patterns must never raise into the monitor loop per §7).
pub fn compile_extra_patterns(patterns: &[String]) -> Vec<regex::Regex> {
    patterns
        .iter()
        .filter_map(|p| regex::Regex::new(p).ok())
        .collect()
}

/// `check_agent_working`: completion patterns take precedence over working
/// patterns; `within_grace_period` covers the case where a message was just
/// sent and no corroborating output has arrived yet.
pub fn check_agent_working(
    recent_output: &str,
    extra_completion_patterns: &[regex::Regex],
    within_grace_period: bool,
) -> bool {
    let lines = trailing_lines(recent_output);
    let joined = lines.join("\n");

    if matches_completion(&joined, extra_completion_patterns) {
        return false;
    }
    matches_working(&joined) || within_grace_period
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_pattern_detects_ellipsis_verb() {
        assert!(matches_working("Building..."));
        assert!(matches_working("Still thinking..."));
    }

    #[test]
    fn working_pattern_detects_step_indicator() {
        assert!(matches_working("step 3 of 10"));
        assert!(matches_working("Task 2: refactor module"));
    }

    #[test]
    fn completion_pattern_detects_literal_token() {
        assert!(matches_completion("Status: COMPLETED", &[]));
    }

    #[test]
    fn completion_pattern_detects_i_have_completed() {
        assert!(matches_completion("I've completed the feature.", &[]));
        assert!(matches_completion(
            "I have finished implementing the login flow.",
            &[]
        ));
    }

    #[test]
    fn completion_pattern_false_for_plain_working_text() {
        assert!(!matches_completion("Writing tests now...", &[]));
    }

    #[test]
    fn error_pattern_case_insensitive() {
        assert!(matches_error("ERROR: Rate Limit exceeded, please retry"));
        assert!(matches_error("Connection Error while reaching backend"));
        assert!(!matches_error("everything nominal"));
    }

    #[test]
    fn check_agent_working_completion_takes_precedence() {
        // Even if a working pattern also appears, completion wins.
        let output = "implementing...\nAll done, task completed.";
        assert!(!check_agent_working(output, &[], false));
    }

    #[test]
    fn check_agent_working_true_within_grace_period() {
        // No working pattern, no completion pattern, but grace period active.
        let output = "some quiet unrelated line\nanother line";
        assert!(check_agent_working(output, &[], true));
        assert!(!check_agent_working(output, &[], false));
    }

    #[test]
    fn trailing_lines_skips_blank_and_caps_count() {
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&format!("line {i}\n\n"));
        }
        let lines = trailing_lines(&text);
        assert_eq!(lines.len(), TRAILING_LINES);
        assert_eq!(lines.last().unwrap(), &"line 29");
    }

    #[test]
    fn still_working_and_direct_confirmation() {
        assert!(matches_still_working("almost done with the last bit"));
        assert!(!matches_still_working("the feature works great"));
        assert!(matches_direct_confirmation("completed the task"));
        assert!(matches_direct_confirmation("Ready for review"));
        assert!(!matches_direct_confirmation("I am working on it"));
    }

    #[test]
    fn hit_counts_are_additive_across_distinct_patterns() {
        let text = "task completed. i've finished the work. all done.";
        assert!(completion_pattern_hit_count(text) >= 2);
        assert_eq!(still_working_hit_count("all fine here"), 0);
        assert_eq!(direct_confirmation_hit_count("completed and ready for review"), 2);
    }

    #[test]
    fn extra_completion_patterns_are_used() {
        let extra = compile_extra_patterns(&["shipped it".to_string()]);
        assert!(matches_completion("shipped it to prod", &extra));
    }

    #[test]
    fn invalid_extra_pattern_is_dropped_not_fatal() {
        let extra = compile_extra_patterns(&["(unterminated".to_string()]);
        assert!(extra.is_empty());
    }
}
