use regex::Regex;

use crate::error::{MatchError, MatchResult};

enum Kind {
    Literal(String),
    Pattern(Regex),
}

/// Matches one string against a pattern that is a literal, a glob
/// (`*`, `?`, `[...]`), or, when wrapped in slashes (`/^[a-z]+$/`), a full
/// regular expression. A leading `~` negates the result.
pub struct StringMatcher {
    negate: bool,
    kind: Kind,
    pattern: String,
}

impl StringMatcher {
    pub fn new(pattern: &str) -> MatchResult<Self> {
        let (negate, body) = strip_negate(pattern);
        let kind = if let Some(inner) = as_full_regex(body) {
            Kind::Pattern(compile(body, inner)?)
        } else if is_glob(body) {
            Kind::Pattern(compile(body, &glob_to_regex(body))?)
        } else {
            Kind::Literal(body.to_string())
        };
        Ok(Self { negate, kind, pattern: pattern.to_string() })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let raw = match &self.kind {
            Kind::Literal(lit) => lit == candidate,
            Kind::Pattern(re) => re.is_match(candidate),
        };
        if self.negate { !raw } else { raw }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True if this pattern can only ever match one exact string.
    pub fn is_pattern_unique(&self) -> bool {
        !self.negate && matches!(self.kind, Kind::Literal(_))
    }

    pub fn is_double_star(&self) -> bool {
        !self.negate && matches!(&self.kind, Kind::Literal(lit) if lit == "**")
    }
}

fn strip_negate(pattern: &str) -> (bool, &str) {
    match pattern.strip_prefix('~') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    }
}

fn as_full_regex(body: &str) -> Option<&str> {
    if body.len() >= 2 && body.starts_with('/') && body.ends_with('/') {
        Some(&body[1..body.len() - 1])
    } else {
        None
    }
}

fn is_glob(body: &str) -> bool {
    body.contains(['*', '?', '['])
}

fn compile(pattern: &str, regex_src: &str) -> MatchResult<Regex> {
    Regex::new(regex_src).map_err(|source| MatchError::BadPattern { pattern: pattern.to_string(), source })
}

/// Converts a simple glob into an anchored regex: `*` -> `.*`, `?` -> `.`,
/// `[...]` passes through untouched as a character class, everything else is
/// escaped literally.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                for next in chars.by_ref() {
                    out.push(next);
                    if next == ']' {
                        break;
                    }
                }
            }
            _ => {
                if "\\.+()|{}^$".contains(c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_matches_exactly() {
        let m = StringMatcher::new("foo").unwrap();
        assert!(m.matches("foo"));
        assert!(!m.matches("foobar"));
        assert!(m.is_pattern_unique());
    }

    #[test]
    fn star_glob_matches_prefix_and_suffix() {
        let m = StringMatcher::new("foo*").unwrap();
        assert!(m.matches("foobar"));
        assert!(!m.matches("barfoo"));
        assert!(!m.is_pattern_unique());
    }

    #[test]
    fn question_mark_matches_one_char() {
        let m = StringMatcher::new("a?c").unwrap();
        assert!(m.matches("abc"));
        assert!(!m.matches("abbc"));
    }

    #[test]
    fn negated_pattern_inverts_result() {
        let m = StringMatcher::new("~foo").unwrap();
        assert!(!m.matches("foo"));
        assert!(m.matches("bar"));
    }

    #[test]
    fn full_regex_syntax_is_honored() {
        let m = StringMatcher::new("/^[a-z]+[0-9]*$/").unwrap();
        assert!(m.matches("abc123"));
        assert!(!m.matches("ABC"));
    }

    #[test]
    fn character_class_glob() {
        let m = StringMatcher::new("item[0-9]").unwrap();
        assert!(m.matches("item5"));
        assert!(!m.matches("itemA"));
    }
}
