use crate::error::MatchResult;
use crate::string_matcher::StringMatcher;

/// Splits both the pattern and the candidate string on `separator` and matches
/// each segment independently. A segment that is exactly `**` matches zero or
/// more candidate segments, the way a double-star glob matches across path
/// boundaries.
pub struct SegmentedStringMatcher {
    negate: bool,
    separator: char,
    segments: Vec<StringMatcher>,
    pattern: String,
}

impl SegmentedStringMatcher {
    pub fn new(pattern: &str, separator: char) -> MatchResult<Self> {
        let (negate, body) = match pattern.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        let segments =
            body.split(separator).map(StringMatcher::new).collect::<MatchResult<Vec<_>>>()?;
        Ok(Self { negate, separator, segments, pattern: pattern.to_string() })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let parts: Vec<&str> = candidate.split(self.separator).collect();
        let raw = match_segments(&self.segments, &parts);
        if self.negate { !raw } else { raw }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn is_pattern_unique(&self) -> bool {
        !self.negate && self.segments.iter().all(StringMatcher::is_pattern_unique)
    }
}

fn match_segments(pattern: &[StringMatcher], candidate: &[&str]) -> bool {
    match pattern.split_first() {
        None => candidate.is_empty(),
        Some((first, rest)) if first.is_double_star() => {
            (0..=candidate.len()).any(|skip| match_segments(rest, &candidate[skip..]))
        }
        Some((first, rest)) => match candidate.split_first() {
            Some((head, tail)) if first.matches(head) => match_segments(rest, tail),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_segment_matches_single_level() {
        let m = SegmentedStringMatcher::new("a.*.c", '.').unwrap();
        assert!(m.matches("a.b.c"));
        assert!(!m.matches("a.b.b.c"));
    }

    #[test]
    fn double_star_matches_any_number_of_segments() {
        let m = SegmentedStringMatcher::new("a.**.c", '.').unwrap();
        assert!(m.matches("a.c"));
        assert!(m.matches("a.b.c"));
        assert!(m.matches("a.b.b.b.c"));
        assert!(!m.matches("a.b.d"));
    }

    #[test]
    fn negated_segmented_pattern_inverts_result() {
        let m = SegmentedStringMatcher::new("~a.*.c", '.').unwrap();
        assert!(!m.matches("a.b.c"));
        assert!(m.matches("x.y.z"));
    }

    #[test]
    fn literal_pattern_is_unique() {
        let m = SegmentedStringMatcher::new("a.b.c", '.').unwrap();
        assert!(m.is_pattern_unique());
        let wild = SegmentedStringMatcher::new("a.*.c", '.').unwrap();
        assert!(!wild.is_pattern_unique());
    }
}
