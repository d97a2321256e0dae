use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("would block: other readers are present")]
    WouldBlock,
    #[error("bad object: lock is not in a state that permits this operation")]
    BadObject,
}

pub type SyncResult<T> = Result<T, SyncError>;
