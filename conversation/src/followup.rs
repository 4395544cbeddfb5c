//! Lexicon-based follow-up detection: a short list of phrasings that signal
//! a question leans on the previous turn rather than standing alone.

const FOLLOW_UP_PHRASES: &[&str] = &[
    "what about",
    "how about",
    "and what",
    "and when",
    "and how",
    "when did",
    "also",
    "tell me more",
    "what else",
    "anything else",
];

/// `true` when `text` opens with, or contains, one of the follow-up
/// phrasings, or is short enough that it reads as elliptical on its own
/// (fewer than four words, no question word of its own).
pub fn is_follow_up(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if FOLLOW_UP_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return true;
    }
    let word_count = lower.split_whitespace().count();
    let has_own_subject = ["patient", "who", "which"].iter().any(|w| lower.contains(w));
    word_count > 0 && word_count <= 4 && !has_own_subject
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_lexicon_phrases() {
        assert!(is_follow_up("What about last month?"));
        assert!(is_follow_up("And when was that?"));
        assert!(is_follow_up("Tell me more"));
    }

    #[test]
    fn recognizes_short_elliptical_questions() {
        assert!(is_follow_up("Last 30 days?"));
    }

    #[test]
    fn standalone_questions_are_not_follow_ups() {
        assert!(!is_follow_up("What medications is the patient currently taking?"));
    }
}
