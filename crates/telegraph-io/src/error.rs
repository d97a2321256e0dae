use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("bad data: {0}")]
    BadData(String),
    #[error("resource limit: {0}")]
    ResourceLimit(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] telegraph_core::CoreError),
    #[error(transparent)]
    Codec(#[from] telegraph_codec::CodecError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
