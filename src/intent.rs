//! Small-talk vs. information-request routing.
//!
//! The router is a pure function over the question text plus a fixed phrase
//! set. It recognizes greetings, thanks, and help requests by near-exact
//! match on normalized text and short-circuits retrieval for them. Everything
//! else is an information request — the router fails open toward retrieval,
//! never toward silently refusing to answer.

use crate::config::IntentConfig;
use crate::models::IntentLabel;

pub struct IntentRouter {
    phrases: Vec<String>,
}

impl IntentRouter {
    pub fn new(config: &IntentConfig) -> Self {
        Self {
            phrases: config
                .small_talk_phrases
                .iter()
                .map(|p| normalize(p))
                .collect(),
        }
    }

    /// Classify a question. Never errors.
    pub fn classify(&self, query: &str) -> IntentLabel {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return IntentLabel::InfoRequest;
        }
        if self.phrases.iter().any(|p| *p == normalized) {
            IntentLabel::SmallTalk
        } else {
            IntentLabel::InfoRequest
        }
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            last_was_space = false;
        } else if c.is_whitespace() || c.is_ascii_punctuation() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntentConfig;

    fn router() -> IntentRouter {
        IntentRouter::new(&IntentConfig::default())
    }

    #[test]
    fn test_greetings_are_small_talk() {
        let r = router();
        assert_eq!(r.classify("hi"), IntentLabel::SmallTalk);
        assert_eq!(r.classify("Hello!"), IntentLabel::SmallTalk);
        assert_eq!(r.classify("  Thanks  "), IntentLabel::SmallTalk);
        assert_eq!(r.classify("GOOD MORNING"), IntentLabel::SmallTalk);
        assert_eq!(r.classify("what can you do?"), IntentLabel::SmallTalk);
    }

    #[test]
    fn test_punctuation_and_whitespace_normalized() {
        let r = router();
        assert_eq!(r.classify("hi   there!!!"), IntentLabel::SmallTalk);
        assert_eq!(r.classify("thank  you."), IntentLabel::SmallTalk);
    }

    #[test]
    fn test_questions_route_to_retrieval() {
        let r = router();
        assert_eq!(
            r.classify("Is Microsoft in the TECH100 index?"),
            IntentLabel::InfoRequest
        );
        assert_eq!(
            r.classify("hello, what does the CSRD require?"),
            IntentLabel::InfoRequest
        );
    }

    #[test]
    fn test_empty_input_fails_open() {
        let r = router();
        assert_eq!(r.classify(""), IntentLabel::InfoRequest);
        assert_eq!(r.classify("   "), IntentLabel::InfoRequest);
    }
}
