use thiserror::Error;

/// Error taxonomy shared by the byte-buffer, flattening, and message layers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("bad argument: {0}")]
    BadArgument(String),
    #[error("out of memory requesting {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("bad data: {0}")]
    BadData(String),
    #[error("bad object: {0}")]
    BadObject(String),
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
