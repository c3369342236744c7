//! Deny-list screening for fabricated listings.
//!
//! Runs before any scoring. A candidate whose name or signal text matches a
//! known-fraudulent pattern, or contains every keyword of a co-occurrence
//! rule, is rejected outright.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::domain::Candidate;

/// A single deny-list regex
#[derive(Debug, Clone)]
pub struct DenyPattern {
    pub label: String,
    pub pattern: Regex,
}

/// Keywords that are benign alone but suspicious together
#[derive(Debug, Clone)]
pub struct CooccurrenceRule {
    pub label: String,
    /// Lowercase keywords; all must appear
    pub keywords: Vec<String>,
}

impl CooccurrenceRule {
    pub fn new(label: &str, keywords: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn matches(&self, haystack_lower: &str) -> bool {
        !self.keywords.is_empty() && self.keywords.iter().all(|k| haystack_lower.contains(k.as_str()))
    }
}

/// Outcome of a deny-list scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeCheck {
    pub is_fake: bool,
    /// Labels of every pattern or rule that matched
    pub matched: Vec<String>,
}

static BUILTIN_DENY_PATTERNS: LazyLock<Vec<DenyPattern>> = LazyLock::new(|| {
    [
        ("known_fabricated_name", r"智聊AI客服"),
        ("guaranteed_returns", r"(?i)\bguaranteed\s+(?:returns?|profits?|income)\b"),
        ("ponzi", r"(?i)\bponzi\b|庞氏"),
        ("absurd_return_claim", r"(?i)\b\d{3,}\s*%\s*(?:monthly|weekly|daily)\b"),
        ("placeholder_name", r"(?i)^\s*(?:test|demo|sample|example)[\s_-]*(?:company|startup|corp|inc)\b"),
        ("lorem_ipsum", r"(?i)\blorem\s+ipsum\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| DenyPattern {
        label: label.to_string(),
        pattern: Regex::new(pattern).expect("built-in deny pattern"),
    })
    .collect()
});

/// Screens candidates against known-fraudulent patterns
#[derive(Debug, Clone)]
pub struct FakePatternDetector {
    deny_patterns: Vec<DenyPattern>,
    cooccurrence_rules: Vec<CooccurrenceRule>,
}

impl Default for FakePatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePatternDetector {
    /// Detector with the built-in deny-list
    pub fn new() -> Self {
        let deny_patterns = BUILTIN_DENY_PATTERNS.clone();

        let cooccurrence_rules = vec![
            CooccurrenceRule::new("crypto_passive_income", &["crypto", "passive income", "limited spots"]),
            CooccurrenceRule::new("buzzword_stack", &["blockchain", "metaverse", "quantum"]),
            CooccurrenceRule::new("pressure_pitch", &["act now", "risk-free", "investment"]),
        ];

        Self {
            deny_patterns,
            cooccurrence_rules,
        }
    }

    /// Detector with custom lists
    pub fn with_rules(deny_patterns: Vec<DenyPattern>, cooccurrence_rules: Vec<CooccurrenceRule>) -> Self {
        Self {
            deny_patterns,
            cooccurrence_rules,
        }
    }

    /// Scan a name and its concatenated signal text
    pub fn check(&self, name: &str, text: &str) -> FakeCheck {
        let mut matched = Vec::new();

        for deny in &self.deny_patterns {
            if deny.pattern.is_match(name) || deny.pattern.is_match(text) {
                matched.push(deny.label.clone());
            }
        }

        let haystack = format!("{}\n{}", name, text).to_lowercase();
        for rule in &self.cooccurrence_rules {
            if rule.matches(&haystack) {
                matched.push(rule.label.clone());
            }
        }

        if !matched.is_empty() {
            debug!(candidate = name, ?matched, "Fake pattern matched");
        }

        FakeCheck {
            is_fake: !matched.is_empty(),
            matched,
        }
    }

    pub fn check_candidate(&self, candidate: &Candidate) -> FakeCheck {
        self.check(&candidate.name, &candidate.combined_text())
    }
}
