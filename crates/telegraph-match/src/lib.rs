mod error;
mod segmented_string_matcher;
mod string_matcher;

pub use error::{MatchError, MatchResult};
pub use segmented_string_matcher::SegmentedStringMatcher;
pub use string_matcher::StringMatcher;
