//! Extraction of answers from normalized transcripts.

use std::sync::OnceLock;

use regex::Regex;

/// Canonical voter id stored for every accepted identity phrase.
pub const CANONICAL_VOTER_ID: &str = "first one";

/// Longest transcript excerpt echoed back to the voter.
const ECHO_LIMIT: usize = 120;

fn identity_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(first one|firstone|first van|first won|firs tone|asked one|ask one)\b",
            )
            .ok()
        })
        .as_ref()
}

/// The canonical voter id if the transcript contains an identity phrase.
pub fn match_identity(transcript: &str) -> Option<&'static str> {
    identity_pattern()?
        .is_match(transcript)
        .then_some(CANONICAL_VOTER_ID)
}

/// Outcome of reading a candidate number out of a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Number(u32),
    /// No ASCII digits at all.
    NoDigits,
    /// Digits present but too large for an id; carries the digit run.
    Overflow(String),
}

/// The first run of ASCII digits, as a candidate number.
pub fn parse_choice(transcript: &str) -> Choice {
    let Some(start) = transcript.find(|c: char| c.is_ascii_digit()) else {
        return Choice::NoDigits;
    };
    let digits: String = transcript[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    match digits.parse::<u32>() {
        Ok(n) => Choice::Number(n),
        Err(_) => Choice::Overflow(digits),
    }
}

/// Whether the transcript asks to cast the vote.
pub fn is_confirmation(transcript: &str) -> bool {
    transcript.to_lowercase().contains("confirm")
}

/// Make recognized text safe to speak and display: control characters
/// dropped, whitespace collapsed, length bounded.
pub fn echo_safe(transcript: &str) -> String {
    let cleaned: String = transcript
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= ECHO_LIMIT {
        collapsed
    } else {
        let mut cut: String = collapsed.chars().take(ECHO_LIMIT).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_accepts_known_mishearings() {
        for phrase in [
            "first one",
            "firstone",
            "first van",
            "first won",
            "firs tone",
            "asked one",
            "ask one",
            "my id is First One please",
        ] {
            assert_eq!(match_identity(phrase), Some("first one"), "{phrase}");
        }
    }

    #[test]
    fn identity_rejects_other_phrases() {
        for phrase in ["hello world", "test1", "last one", "firstones", "the first"] {
            assert_eq!(match_identity(phrase), None, "{phrase}");
        }
    }

    #[test]
    fn choice_takes_first_digit_run() {
        assert_eq!(parse_choice("candidate number 2"), Choice::Number(2));
        assert_eq!(parse_choice("12 or 3"), Choice::Number(12));
        assert_eq!(parse_choice("two"), Choice::NoDigits);
        assert_eq!(
            parse_choice("99999999999"),
            Choice::Overflow("99999999999".into())
        );
    }

    #[test]
    fn confirmation_is_substring_match() {
        assert!(is_confirmation("confirm"));
        assert!(is_confirmation("yes i Confirmed"));
        assert!(!is_confirmation("cancel"));
        assert!(!is_confirmation("nope"));
    }

    #[test]
    fn echo_strips_controls_and_bounds_length() {
        assert_eq!(echo_safe("hello\u{7}\tworld\n"), "hello world");
        let long = "a".repeat(500);
        let echoed = echo_safe(&long);
        assert_eq!(echoed.chars().count(), ECHO_LIMIT + 3);
        assert!(echoed.ends_with("..."));
    }
}
