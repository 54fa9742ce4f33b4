//! Worker output handling: tail buffering and CLI output parsing.

use chrono::{DateTime, Duration, Timelike, Utc};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::OnceLock;

/// Bounded tail buffer for streamed worker output.
///
/// Keeps only the most recent lines once the character budget is exceeded
/// and remembers that truncation happened.
#[derive(Debug)]
pub struct OutputBuffer {
    chunks: VecDeque<String>,
    chars: usize,
    max_chars: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            chars: 0,
            max_chars,
            truncated: false,
        }
    }

    pub fn push_line(&mut self, line: &str) {
        if self.max_chars == 0 {
            return;
        }
        self.chars += line.len() + 1;
        self.chunks.push_back(line.to_string());
        while self.chars > self.max_chars {
            if let Some(removed) = self.chunks.pop_front() {
                self.chars -= removed.len() + 1;
                self.truncated = true;
            } else {
                break;
            }
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Join the retained tail into one string.
    pub fn contents(&self) -> String {
        let mut out = String::with_capacity(self.chars);
        for chunk in &self.chunks {
            out.push_str(chunk);
            out.push('\n');
        }
        out
    }
}

/// Accumulated token counts parsed from worker output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub input: i64,
    pub output: i64,
}

impl TokenTotals {
    pub fn total(&self) -> i64 {
        self.input + self.output
    }
}

/// Parse per-line JSON token usage from CLI output.
///
/// Accepts `usage.{input_tokens,output_tokens}`,
/// `usage.{prompt_tokens,completion_tokens}`, and the same pairs at the
/// top level. Non-JSON lines are skipped.
pub fn parse_token_usage(output: &str) -> TokenTotals {
    let mut totals = TokenTotals::default();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(data) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };

        let source = data.get("usage").unwrap_or(&data);
        let input = source
            .get("input_tokens")
            .or_else(|| source.get("prompt_tokens"))
            .and_then(serde_json::Value::as_i64);
        let output_tokens = source
            .get("output_tokens")
            .or_else(|| source.get("completion_tokens"))
            .and_then(serde_json::Value::as_i64);

        if input.is_some() || output_tokens.is_some() {
            totals.input += input.unwrap_or(0);
            totals.output += output_tokens.unwrap_or(0);
        }
    }

    totals
}

fn reset_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)resets?\s+(\d{1,2})(am|pm)\s*\(?\s*UTC\s*\)?").expect("valid regex")
    })
}

/// Scan worker output for provider rate-limit markers.
///
/// Recognises `hit your limit`, `rate limit` and bare `429`; parses
/// "resets Npm (UTC)" when present, otherwise assumes a one-hour reset.
pub fn detect_rate_limit_reset(output: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if output.is_empty() {
        return None;
    }

    let lower = output.to_lowercase();
    if !(lower.contains("hit your limit") || lower.contains("rate limit") || lower.contains("429"))
    {
        return None;
    }

    if let Some(caps) = reset_time_regex().captures(output) {
        let hour: u32 = caps[1].parse().ok()?;
        let meridiem = caps[2].to_lowercase();
        let hour = match (hour, meridiem.as_str()) {
            (12, "am") => 0,
            (12, "pm") => 12,
            (h, "pm") => h + 12,
            (h, _) => h,
        };
        if hour > 23 {
            return Some(now + Duration::hours(1));
        }

        let reset = now
            .with_hour(hour)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))?;
        // A reset hour already behind us means tomorrow.
        let reset = if reset <= now { reset + Duration::days(1) } else { reset };
        return Some(reset);
    }

    Some(now + Duration::hours(1))
}

/// Extract a short human-readable summary from worker output.
///
/// Takes the text of the last `item.completed` / `agent_message` JSON line,
/// truncated to `max_chars`.
pub fn extract_summary(output: &str, max_chars: usize) -> Option<String> {
    let mut summary: Option<String> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(data) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if data.get("type").and_then(|t| t.as_str()) != Some("item.completed") {
            continue;
        }
        let Some(item) = data.get("item") else { continue };
        if item.get("type").and_then(|t| t.as_str()) == Some("agent_message") {
            if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                if !text.is_empty() {
                    summary = Some(text.to_string());
                }
            }
        }
    }

    let mut summary = summary?;
    if max_chars > 0 && summary.chars().count() > max_chars {
        summary = summary.chars().take(max_chars).collect::<String>().trim_end().to_string();
        summary.push('…');
    }
    Some(summary)
}

/// Tail of the output for embedding in a task result.
pub fn output_excerpt(output: &str, max_chars: usize) -> Option<String> {
    if output.is_empty() {
        return None;
    }
    if max_chars == 0 {
        return Some(String::new());
    }
    let chars: Vec<char> = output.chars().collect();
    let start = chars.len().saturating_sub(max_chars);
    Some(chars[start..].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_buffer_keeps_tail_and_flags_truncation() {
        let mut buffer = OutputBuffer::new(20);
        buffer.push_line("first line that is long");
        buffer.push_line("tail");

        assert!(buffer.truncated());
        let contents = buffer.contents();
        assert!(contents.contains("tail"));
        assert!(!contents.contains("first"));
    }

    #[test]
    fn test_buffer_under_budget() {
        let mut buffer = OutputBuffer::new(1000);
        buffer.push_line("a");
        buffer.push_line("b");
        assert!(!buffer.truncated());
        assert_eq!(buffer.contents(), "a\nb\n");
    }

    #[test]
    fn test_parse_token_usage_both_schemas() {
        let output = concat!(
            "{\"usage\": {\"input_tokens\": 100, \"output_tokens\": 20}}\n",
            "not json\n",
            "{\"usage\": {\"prompt_tokens\": 50, \"completion_tokens\": 10}}\n",
            "{\"input_tokens\": 5, \"output_tokens\": 1}\n",
        );
        let totals = parse_token_usage(output);
        assert_eq!(totals.input, 155);
        assert_eq!(totals.output, 31);
        assert_eq!(totals.total(), 186);
    }

    #[test]
    fn test_parse_token_usage_empty() {
        assert_eq!(parse_token_usage(""), TokenTotals::default());
        assert_eq!(parse_token_usage("plain text\n"), TokenTotals::default());
    }

    #[test]
    fn test_detect_rate_limit_with_reset_time() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 0).unwrap();
        let reset = detect_rate_limit_reset("You've hit your limit · resets 5pm (UTC)", now).unwrap();
        assert_eq!(reset, Utc.with_ymd_and_hms(2026, 8, 1, 17, 0, 0).unwrap());
    }

    #[test]
    fn test_detect_rate_limit_past_hour_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 20, 0, 0).unwrap();
        let reset = detect_rate_limit_reset("hit your limit · resets 5pm (UTC)", now).unwrap();
        assert_eq!(reset, Utc.with_ymd_and_hms(2026, 8, 2, 17, 0, 0).unwrap());
    }

    #[test]
    fn test_detect_rate_limit_defaults_to_one_hour() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let reset = detect_rate_limit_reset("HTTP 429 Too Many Requests", now).unwrap();
        assert_eq!(reset, now + Duration::hours(1));

        let reset = detect_rate_limit_reset("provider rate limit reached", now).unwrap();
        assert_eq!(reset, now + Duration::hours(1));
    }

    #[test]
    fn test_detect_rate_limit_ignores_clean_output() {
        let now = Utc::now();
        assert!(detect_rate_limit_reset("all tests passed", now).is_none());
        assert!(detect_rate_limit_reset("", now).is_none());
    }

    #[test]
    fn test_extract_summary_takes_last_agent_message() {
        let output = concat!(
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"agent_message\", \"text\": \"first\"}}\n",
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"tool_call\", \"text\": \"skip\"}}\n",
            "{\"type\": \"item.completed\", \"item\": {\"type\": \"agent_message\", \"text\": \"did the thing\"}}\n",
        );
        assert_eq!(extract_summary(output, 800).unwrap(), "did the thing");
    }

    #[test]
    fn test_extract_summary_truncates() {
        let long = "x".repeat(100);
        let output = format!(
            "{{\"type\": \"item.completed\", \"item\": {{\"type\": \"agent_message\", \"text\": \"{long}\"}}}}\n"
        );
        let summary = extract_summary(&output, 10).unwrap();
        assert!(summary.ends_with('…'));
        assert_eq!(summary.chars().count(), 11);
    }

    #[test]
    fn test_extract_summary_none_without_agent_message() {
        assert!(extract_summary("plain output\n", 800).is_none());
    }

    #[test]
    fn test_output_excerpt_tail() {
        assert_eq!(output_excerpt("abcdef", 3).unwrap(), "def");
        assert_eq!(output_excerpt("abc", 10).unwrap(), "abc");
        assert!(output_excerpt("", 10).is_none());
    }
}
