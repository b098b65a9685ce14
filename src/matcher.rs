//! String matching for tag-based selection predicates.
//!
//! A [`StringMatcher`] is a small value describing how to test a string,
//! typically a tag value, during relation selection. The `Regex` variant
//! only exists with the `regex` cargo feature enabled.

use std::fmt;

use itertools::Itertools;

/// A string predicate, dispatched by variant.
///
/// The default matcher never matches.
#[derive(Debug, Clone, Default)]
pub enum StringMatcher {
    /// Never matches.
    #[default]
    AlwaysFalse,
    /// Always matches.
    AlwaysTrue,
    /// Matches strings equal to the stored string.
    Equal(String),
    /// Matches strings starting with the stored string.
    Prefix(String),
    /// Matches strings containing the stored string.
    Substring(String),
    /// Matches strings the regular expression is found in.
    #[cfg(feature = "regex")]
    Regex(regex::Regex),
    /// Matches strings equal to any of the stored strings.
    List(Vec<String>),
}

impl StringMatcher {
    pub fn equal(s: impl Into<String>) -> Self {
        StringMatcher::Equal(s.into())
    }

    pub fn prefix(s: impl Into<String>) -> Self {
        StringMatcher::Prefix(s.into())
    }

    pub fn substring(s: impl Into<String>) -> Self {
        StringMatcher::Substring(s.into())
    }

    pub fn list<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StringMatcher::List(strings.into_iter().map(Into::into).collect())
    }

    /// Compiles `pattern` and builds a regex matcher.
    #[cfg(feature = "regex")]
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(StringMatcher::Regex(regex::Regex::new(pattern)?))
    }

    /// Tests `value` against this matcher.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringMatcher::AlwaysFalse => false,
            StringMatcher::AlwaysTrue => true,
            StringMatcher::Equal(s) => value == s,
            StringMatcher::Prefix(s) => value.starts_with(s),
            StringMatcher::Substring(s) => value.contains(s.as_str()),
            #[cfg(feature = "regex")]
            StringMatcher::Regex(re) => re.is_match(value),
            StringMatcher::List(strings) => strings.iter().any(|s| s == value),
        }
    }
}

impl From<bool> for StringMatcher {
    fn from(result: bool) -> Self {
        if result {
            StringMatcher::AlwaysTrue
        } else {
            StringMatcher::AlwaysFalse
        }
    }
}

impl From<&str> for StringMatcher {
    fn from(s: &str) -> Self {
        StringMatcher::equal(s)
    }
}

impl From<String> for StringMatcher {
    fn from(s: String) -> Self {
        StringMatcher::Equal(s)
    }
}

impl From<Vec<String>> for StringMatcher {
    fn from(strings: Vec<String>) -> Self {
        StringMatcher::List(strings)
    }
}

impl fmt::Display for StringMatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StringMatcher::AlwaysFalse => write!(f, "always_false"),
            StringMatcher::AlwaysTrue => write!(f, "always_true"),
            StringMatcher::Equal(s) => write!(f, "equal[{}]", s),
            StringMatcher::Prefix(s) => write!(f, "prefix[{}]", s),
            StringMatcher::Substring(s) => write!(f, "substring[{}]", s),
            #[cfg(feature = "regex")]
            StringMatcher::Regex(re) => write!(f, "regex[{}]", re.as_str()),
            StringMatcher::List(strings) => {
                write!(
                    f,
                    "list[{}]",
                    strings.iter().map(|s| format!("[{}]", s)).join("")
                )
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_constant_matchers() {
        assert!(!StringMatcher::AlwaysFalse.matches(""));
        assert!(!StringMatcher::AlwaysFalse.matches("foo"));
        assert!(StringMatcher::AlwaysTrue.matches(""));
        assert!(StringMatcher::AlwaysTrue.matches("foo"));

        assert!(!StringMatcher::default().matches("foo"));
        assert!(StringMatcher::from(true).matches("foo"));
        assert!(!StringMatcher::from(false).matches("foo"));
    }

    #[test]
    fn test_equal() {
        let m = StringMatcher::from("multipolygon");
        assert!(m.matches("multipolygon"));
        assert!(!m.matches("multipolygo"));
        assert!(!m.matches("multipolygons"));
        assert!(!m.matches(""));
    }

    #[test]
    fn test_prefix() {
        let m = StringMatcher::prefix("multi");
        assert!(m.matches("multi"));
        assert!(m.matches("multipolygon"));
        assert!(!m.matches("ulti"));
        assert!(!m.matches(""));

        // empty prefix matches everything
        assert!(StringMatcher::prefix("").matches("anything"));
    }

    #[test]
    fn test_substring() {
        let m = StringMatcher::substring("poly");
        assert!(m.matches("polygon"));
        assert!(m.matches("multipolygon"));
        assert!(!m.matches("pol"));
        assert!(StringMatcher::substring("").matches(""));
    }

    #[test]
    fn test_list() {
        let m = StringMatcher::list(["boundary", "multipolygon"]);
        assert!(m.matches("boundary"));
        assert!(m.matches("multipolygon"));
        assert!(!m.matches("route"));
        assert!(!StringMatcher::list(Vec::<String>::new()).matches("boundary"));
    }

    #[cfg(feature = "regex")]
    #[test]
    fn test_regex() {
        let m = StringMatcher::regex("^multi").unwrap();
        assert!(m.matches("multipolygon"));
        assert!(!m.matches("not multi"));

        // search semantics, not full-string match
        let m = StringMatcher::regex("poly").unwrap();
        assert!(m.matches("multipolygon"));

        assert!(StringMatcher::regex("(").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(StringMatcher::AlwaysFalse.to_string(), "always_false");
        assert_eq!(StringMatcher::equal("ab").to_string(), "equal[ab]");
        assert_eq!(
            StringMatcher::list(["a", "b"]).to_string(),
            "list[[a][b]]"
        );
    }

    proptest! {
        #[test]
        fn equal_agrees_with_string_equality(a in "\\PC*", b in "\\PC*") {
            prop_assert_eq!(StringMatcher::equal(a.clone()).matches(&b), a == b);
        }

        #[test]
        fn prefix_agrees_with_starts_with(a in "\\PC*", b in "\\PC*") {
            prop_assert_eq!(StringMatcher::prefix(a.clone()).matches(&b), b.starts_with(&a));
        }

        #[test]
        fn substring_agrees_with_contains(a in "\\PC*", b in "\\PC*") {
            prop_assert_eq!(StringMatcher::substring(a.clone()).matches(&b), b.contains(&a));
        }
    }
}
