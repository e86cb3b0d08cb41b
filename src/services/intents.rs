use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::services::settings::IntentRuleConfig;
use crate::traits::chat_api::BoxError;

pub const SAFETY_WARNING: &str = "The Amanita Muscaria contains a neurotoxin that can cause delirium. \
It's important to prepare it correctly to avoid adverse effects. \
Are you familiar with the proper preparation methods?";

pub const GREETING: &str =
    "Hello! How can I help you today? What do you want to know about mushrooms?";

pub const FAREWELL: &str =
    "Goodbye! Have a great day! Comeback if you have more questions about mushrooms.";

const REGEX_PREFIX: &str = "regex:";

enum Matcher {
    Literal { needle: String, case_insensitive: bool },
    Pattern(Regex),
}

impl Matcher {
    fn parse(raw: &str, case_insensitive: bool) -> Result<Self, BoxError> {
        match raw.strip_prefix(REGEX_PREFIX) {
            Some(expr) => {
                let re = RegexBuilder::new(expr)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| format!("invalid intent pattern {:?}: {}", raw, e))?;
                Ok(Matcher::Pattern(re))
            }
            None => Ok(Matcher::Literal {
                needle: if case_insensitive { raw.to_lowercase() } else { raw.to_string() },
                case_insensitive,
            }),
        }
    }

    fn is_match(&self, text: &str, lowered: &str) -> bool {
        match self {
            Matcher::Literal { needle, case_insensitive: false } => text.contains(needle.as_str()),
            Matcher::Literal { needle, case_insensitive: true } => lowered.contains(needle.as_str()),
            Matcher::Pattern(re) => re.is_match(text),
        }
    }
}

/// Known intent routed to a canned reply before the model is involved.
pub struct IntentRule {
    name: String,
    matchers: Vec<Matcher>,
    response: String,
}

impl IntentRule {
    pub fn new(
        name: impl Into<String>,
        patterns: &[&str],
        response: impl Into<String>,
        case_insensitive: bool,
    ) -> Result<Self, BoxError> {
        let matchers = patterns
            .iter()
            .map(|p| Matcher::parse(p, case_insensitive))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name: name.into(), matchers, response: response.into() })
    }

    fn is_match(&self, text: &str, lowered: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(text, lowered))
    }
}

/// Outcome of a successful intent check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentMatch<'a> {
    pub rule: &'a str,
    pub response: &'a str,
}

/// Ordered rule table; the first matching rule wins.
///
/// Matching is an unanchored substring search and, unless a rule opts in to
/// `case_insensitive`, case-sensitive: "HELLO" misses the greeting rule while
/// "they" hits it, and "Goodbye" still hits the farewell rule through "bye".
pub struct IntentFilter {
    rules: Vec<IntentRule>,
}

impl IntentFilter {
    pub fn new(rules: Vec<IntentRule>) -> Self {
        Self { rules }
    }

    /// Built-in table: safety warning, then greeting, then farewell.
    pub fn defaults() -> Self {
        let rule = |name: &str, patterns: &[&str], response: &str| IntentRule {
            name: name.to_string(),
            matchers: patterns
                .iter()
                .map(|p| Matcher::Literal { needle: p.to_string(), case_insensitive: false })
                .collect(),
            response: response.to_string(),
        };
        Self::new(vec![
            rule("safety", &["Amanita Muscaria", "red mushroom"], SAFETY_WARNING),
            rule("greeting", &["hello", "hey"], GREETING),
            rule("farewell", &["bye", "goodbye"], FAREWELL),
        ])
    }

    /// Uses the configured table when present, the built-in one otherwise.
    pub fn from_config(rules: Option<&[IntentRuleConfig]>) -> Result<Self, BoxError> {
        let Some(rules) = rules else {
            return Ok(Self::defaults());
        };
        let rules = rules
            .iter()
            .map(|r| {
                let patterns: Vec<&str> = r.patterns.iter().map(String::as_str).collect();
                IntentRule::new(r.name.clone(), &patterns, r.response.clone(), r.case_insensitive)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn check(&self, text: &str) -> Option<IntentMatch<'_>> {
        let lowered = text.to_lowercase();
        let hit = self.rules.iter().find(|r| r.is_match(text, &lowered))?;
        debug!(rule = %hit.name, "intent matched");
        Some(IntentMatch { rule: &hit.name, response: &hit.response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("hello there")]
    #[case("hey, what's up")]
    #[case("they grow in autumn")]
    fn greeting_matches(#[case] text: &str) {
        let filter = IntentFilter::defaults();
        let m = filter.check(text).unwrap();
        assert_eq!(m.rule, "greeting");
        assert_eq!(m.response, GREETING);
    }

    #[rstest]
    #[case("bye")]
    #[case("ok goodbye")]
    #[case("Goodbye")]
    fn farewell_matches(#[case] text: &str) {
        let filter = IntentFilter::defaults();
        let m = filter.check(text).unwrap();
        assert_eq!(m.rule, "farewell");
        assert_eq!(m.response, FAREWELL);
    }

    #[rstest]
    #[case("Is Amanita Muscaria edible?")]
    #[case("I found a red mushroom")]
    #[case("hello, I found a red mushroom, bye")]
    #[case("goodbye Amanita Muscaria")]
    fn safety_takes_precedence(#[case] text: &str) {
        let filter = IntentFilter::defaults();
        let m = filter.check(text).unwrap();
        assert_eq!(m.rule, "safety");
        assert_eq!(m.response, SAFETY_WARNING);
    }

    #[test]
    fn greeting_precedes_farewell() {
        let filter = IntentFilter::defaults();
        let m = filter.check("hello and goodbye").unwrap();
        assert_eq!(m.rule, "greeting");
    }

    #[rstest]
    #[case("")]
    #[case("BYE")]
    #[case("HELLO")]
    #[case("amanita muscaria")]
    #[case("What is a chanterelle?")]
    fn case_sensitive_misses(#[case] text: &str) {
        let filter = IntentFilter::defaults();
        assert!(filter.check(text).is_none());
    }

    #[test]
    fn configured_rules_support_regex_and_case_folding() {
        let rules = vec![
            IntentRuleConfig {
                name: "thanks".to_string(),
                patterns: vec!["Thank".to_string()],
                response: "You're welcome!".to_string(),
                case_insensitive: true,
            },
            IntentRuleConfig {
                name: "price".to_string(),
                patterns: vec![r"regex:\bcost(s)?\b".to_string()],
                response: "I only talk about mushrooms.".to_string(),
                case_insensitive: false,
            },
        ];
        let filter = IntentFilter::from_config(Some(&rules)).unwrap();
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.check("THANKS a lot").unwrap().rule, "thanks");
        assert_eq!(filter.check("what does it cost").unwrap().rule, "price");
        assert!(filter.check("costume").is_none());
        // встроенные правила заменены целиком
        assert!(filter.check("hello").is_none());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let rules = vec![IntentRuleConfig {
            name: "broken".to_string(),
            patterns: vec!["regex:(".to_string()],
            response: "x".to_string(),
            case_insensitive: false,
        }];
        assert!(IntentFilter::from_config(Some(&rules)).is_err());
    }
}
