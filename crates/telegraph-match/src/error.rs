use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("bad pattern '{pattern}': {source}")]
    BadPattern { pattern: String, source: regex::Error },
}

pub type MatchResult<T> = Result<T, MatchError>;
