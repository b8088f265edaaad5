// src/rules.rs
// Declarative request matching. One MatchRule is one typed comparison
// against a named request field; the matched value is captured for
// reporting before the comparison runs.

use regex::Regex;

use crate::request::Request;

/// Comparison semantics of a rule.
#[derive(Debug, Clone)]
pub enum MatchKind {
    Exact(String),
    /// Substring test. With several needles, any match wins.
    Contains(Vec<String>),
    In(Vec<String>),
    NotIn(Vec<String>),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct MatchRule {
    pub kind: MatchKind,
    pub field: String,
    /// Field value captured by the most recent evaluation. Overwritten on
    /// every call.
    pub matched: String,
}

impl MatchRule {
    pub fn new(kind: MatchKind, field: &str) -> MatchRule {
        MatchRule { kind, field: field.to_string(), matched: String::new() }
    }

    /// Record the field's current value into `matched`, then compare.
    /// No coercion happens beyond the stringification `Request::field`
    /// already performs. An unknown field evaluates to false for every
    /// kind except NotIn, which evaluates to true.
    pub fn evaluate(&mut self, request: &Request) -> bool {
        self.matched = request.field(&self.field);
        match &self.kind {
            MatchKind::Exact(expected) => self.matched == *expected,
            MatchKind::Contains(needles) => {
                needles.iter().any(|n| !n.is_empty() && self.matched.contains(n.as_str()))
            }
            MatchKind::In(set) => set.iter().any(|v| *v == self.matched),
            MatchKind::NotIn(set) => !set.iter().any(|v| *v == self.matched),
            MatchKind::Pattern(re) => re.is_match(&self.matched),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> Request {
        Request {
            method: "GET".to_string(),
            path: "/admin/users".to_string(),
            agent: "curl/8.0".to_string(),
            ..Request::default()
        }
    }

    #[test]
    fn exact_matches_the_field_value() {
        let mut rule = MatchRule::new(MatchKind::Exact("GET".to_string()), "method");
        assert!(rule.evaluate(&req()));
        assert_eq!(rule.matched, "GET");
        let mut rule = MatchRule::new(MatchKind::Exact("POST".to_string()), "method");
        assert!(!rule.evaluate(&req()));
    }

    #[test]
    fn contains_accepts_any_needle() {
        let mut rule = MatchRule::new(
            MatchKind::Contains(vec!["wget".to_string(), "curl".to_string()]),
            "agent",
        );
        assert!(rule.evaluate(&req()));
        let mut rule = MatchRule::new(MatchKind::Contains(vec!["python".to_string()]), "agent");
        assert!(!rule.evaluate(&req()));
    }

    #[test]
    fn pattern_matches_anywhere() {
        let mut rule =
            MatchRule::new(MatchKind::Pattern(Regex::new("^/admin").unwrap()), "path");
        assert!(rule.evaluate(&req()));
        assert_eq!(rule.matched, "/admin/users");
    }

    #[test]
    fn unknown_field_false_except_not_in() {
        let set = vec!["x".to_string()];
        let r = req();
        assert!(!MatchRule::new(MatchKind::Exact("x".to_string()), "nope").evaluate(&r));
        assert!(!MatchRule::new(MatchKind::Contains(set.clone()), "nope").evaluate(&r));
        assert!(!MatchRule::new(MatchKind::In(set.clone()), "nope").evaluate(&r));
        assert!(MatchRule::new(MatchKind::NotIn(set), "nope").evaluate(&r));
    }

    #[test]
    fn reevaluation_overwrites_matched() {
        let mut rule = MatchRule::new(MatchKind::Exact("GET".to_string()), "method");
        rule.evaluate(&req());
        assert_eq!(rule.matched, "GET");
        let mut other = req();
        other.method = "POST".to_string();
        rule.evaluate(&other);
        assert_eq!(rule.matched, "POST");
    }
}
