use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("bad object: {0}")]
    BadObject(String),
    #[error("timed out")]
    TimedOut,
    #[error("shutting down")]
    ShuttingDown,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ThreadResult<T> = Result<T, ThreadError>;
