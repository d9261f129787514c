//! Output post-processing: noise removal, pattern matching, line budget.

use crate::error::DiagResult;
use crate::validate;
use regex::Regex;

/// Line budget used when the caller gives none (or a non-positive one)
pub const DEFAULT_MAX_LINES: usize = 100;

/// Leading text of the notice appended to truncated output
pub const TRUNCATION_PREFIX: &str = "... Output truncated.";

pub fn truncation_notice(shown: usize, total: usize) -> String {
    format!(
        "{} Showing first {} lines out of {} total lines.",
        TRUNCATION_PREFIX, shown, total
    )
}

/// Lines mentioning warnings are environment chatter, not command output
pub fn is_noise(line: &str) -> bool {
    line.to_lowercase().contains("warning")
}

/// Remove noise lines, keeping everything else byte for byte
pub fn filter_noise(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let (lines, trailing_newline) = split_lines(text);
    let kept: Vec<&str> = lines.into_iter().filter(|line| !is_noise(line)).collect();
    join_lines(&kept, trailing_newline && !kept.is_empty())
}

/// Result of applying an [`OutputPolicy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub text: String,
    pub truncated: bool,
    /// Lines left after filtering, before the budget was applied
    pub total_lines: usize,
}

#[derive(Debug, Clone)]
pub struct OutputPolicy {
    max_lines: usize,
    pattern: Option<Regex>,
    drop_noise: bool,
}

impl Default for OutputPolicy {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            pattern: None,
            drop_noise: true,
        }
    }
}

impl OutputPolicy {
    /// Policy with the given budget; `None` or `<= 0` means the default
    pub fn new(max_lines: Option<i64>) -> Self {
        Self::with_default(max_lines, DEFAULT_MAX_LINES)
    }

    pub fn with_default(max_lines: Option<i64>, default: usize) -> Self {
        let default = if default == 0 { DEFAULT_MAX_LINES } else { default };
        let max_lines = match max_lines {
            Some(n) if n > 0 => n as usize,
            _ => default,
        };
        Self {
            max_lines,
            ..Self::default()
        }
    }

    /// Keep only lines matching `pattern` (validated and compiled here)
    pub fn with_pattern(mut self, field: &str, pattern: Option<&str>) -> DiagResult<Self> {
        self.pattern = match validate::non_blank(pattern) {
            Some(p) => Some(validate::search_pattern(field, p)?),
            None => None,
        };
        Ok(self)
    }

    /// Keep noise lines (used for raw archive content)
    pub fn keep_noise(mut self) -> Self {
        self.drop_noise = false;
        self
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn has_pattern(&self) -> bool {
        self.pattern.is_some()
    }

    fn keeps(&self, line: &str) -> bool {
        if self.drop_noise && is_noise(line) {
            return false;
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(line),
            None => true,
        }
    }

    /// Apply the policy to raw command output
    pub fn apply(&self, raw: &str) -> Processed {
        if raw.is_empty() {
            return Processed {
                text: String::new(),
                truncated: false,
                total_lines: 0,
            };
        }

        let (mut lines, trailing_newline) = split_lines(raw);

        // A notice from an earlier pass is carried over, never counted
        let has_notice = lines
            .last()
            .is_some_and(|last| last.starts_with(TRUNCATION_PREFIX));
        let previous_notice = if has_notice { lines.pop() } else { None };

        let kept: Vec<&str> = lines.into_iter().filter(|line| self.keeps(line)).collect();
        let total_lines = kept.len();

        if total_lines > self.max_lines {
            let notice = truncation_notice(self.max_lines, total_lines);
            let mut shown: Vec<&str> = kept[..self.max_lines].to_vec();
            shown.push(&notice);
            return Processed {
                text: join_lines(&shown, false),
                truncated: true,
                total_lines,
            };
        }

        match previous_notice {
            Some(notice) => {
                let mut shown = kept;
                shown.push(notice);
                Processed {
                    text: join_lines(&shown, false),
                    truncated: true,
                    total_lines,
                }
            }
            None => Processed {
                text: join_lines(&kept, trailing_newline && !kept.is_empty()),
                truncated: false,
                total_lines,
            },
        }
    }

    /// Apply the policy to already split lines (for structured results)
    pub fn apply_lines(&self, lines: Vec<String>) -> (Vec<String>, bool) {
        let kept: Vec<String> = lines.into_iter().filter(|line| self.keeps(line)).collect();
        limit_lines(kept, self.max_lines)
    }
}

/// Keep at most `max_lines` (non-positive budgets fall back to the default)
pub fn limit_lines(mut lines: Vec<String>, max_lines: usize) -> (Vec<String>, bool) {
    let max_lines = if max_lines == 0 { DEFAULT_MAX_LINES } else { max_lines };
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        (lines, true)
    } else {
        (lines, false)
    }
}

/// Split into trimmed, non-empty lines
pub fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop whitespace-only lines, keeping the others untouched
pub fn strip_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

pub fn head(mut lines: Vec<String>, n: usize) -> Vec<String> {
    if n > 0 && n < lines.len() {
        lines.truncate(n);
    }
    lines
}

pub fn tail(mut lines: Vec<String>, n: usize) -> Vec<String> {
    if n > 0 && n < lines.len() {
        lines.drain(..lines.len() - n);
    }
    lines
}

fn split_lines(text: &str) -> (Vec<&str>, bool) {
    let trailing_newline = text.ends_with('\n');
    let body = if trailing_newline {
        &text[..text.len() - 1]
    } else {
        text
    };
    (body.split('\n').collect(), trailing_newline)
}

fn join_lines(lines: &[&str], trailing_newline: bool) -> String {
    let mut text = lines.join("\n");
    if trailing_newline {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_non_positive_budget_uses_default() {
        for budget in [None, Some(0), Some(-5)] {
            assert_eq!(OutputPolicy::new(budget).max_lines(), DEFAULT_MAX_LINES);
        }
        assert_eq!(OutputPolicy::new(Some(7)).max_lines(), 7);
    }

    #[test]
    fn test_short_output_is_unchanged() {
        let policy = OutputPolicy::new(Some(0));
        for raw in ["single", "a\nb\nc\n", "a\r\nb", &numbered(100)] {
            let processed = policy.apply(raw);
            assert_eq!(processed.text, raw);
            assert!(!processed.truncated);
        }
    }

    #[test]
    fn test_truncation_shows_exactly_budget_plus_notice() {
        for (n, limit) in [(101usize, 100i64), (10, 3), (2, 1), (500, 42)] {
            let processed = OutputPolicy::new(Some(limit)).apply(&numbered(n));
            let lines: Vec<&str> = processed.text.split('\n').collect();
            assert_eq!(lines.len(), limit as usize + 1);
            let notices = lines.iter().filter(|l| l.starts_with(TRUNCATION_PREFIX)).count();
            assert_eq!(notices, 1);
            assert_eq!(
                *lines.last().unwrap(),
                format!(
                    "... Output truncated. Showing first {} lines out of {} total lines.",
                    limit, n
                )
            );
            assert!(processed.truncated);
            assert_eq!(processed.total_lines, n);
        }
    }

    #[test]
    fn test_reapplying_is_a_no_op() {
        let policy = OutputPolicy::new(Some(5));
        let once = policy.apply(&numbered(20));
        let twice = policy.apply(&once.text);
        assert_eq!(once.text, twice.text);
        assert!(twice.truncated);
    }

    #[test]
    fn test_noise_filter_is_idempotent() {
        let raw = "Chain INPUT\nWARNING: legacy tables present\nACCEPT all\nsome Warning here\n";
        let once = filter_noise(raw);
        assert_eq!(once, "Chain INPUT\nACCEPT all\n");
        assert_eq!(filter_noise(&once), once);
        assert_eq!(filter_noise("only a warning"), "");
    }

    #[test]
    fn test_pattern_and_noise() {
        let policy = OutputPolicy::new(None)
            .with_pattern("pattern", Some("^tcp"))
            .unwrap();
        let processed = policy.apply("tcp 1\nudp 2\ntcp warning 3\ntcp 4");
        assert_eq!(processed.text, "tcp 1\ntcp 4");
        assert!(OutputPolicy::new(None).with_pattern("pattern", Some("[")).is_err());
    }

    #[test]
    fn test_head_and_tail() {
        let lines: Vec<String> = (1..=5).map(|i| i.to_string()).collect();
        assert_eq!(head(lines.clone(), 2), vec!["1", "2"]);
        assert_eq!(tail(lines.clone(), 2), vec!["4", "5"]);
        assert_eq!(tail(lines.clone(), 0).len(), 5);
        assert_eq!(head(lines, 10).len(), 5);
    }

    #[test]
    fn test_limit_lines() {
        let lines: Vec<String> = (0..150).map(|i| i.to_string()).collect();
        let (kept, truncated) = limit_lines(lines, 0);
        assert_eq!(kept.len(), DEFAULT_MAX_LINES);
        assert!(truncated);
    }
}
