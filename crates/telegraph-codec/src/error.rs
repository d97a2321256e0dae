use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("bad data: {0}")]
    BadData(String),
    #[error("zlib error: {0}")]
    Zlib(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;
