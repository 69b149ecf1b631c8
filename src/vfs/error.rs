use thiserror::Error;

use crate::cadapter::GatewayError;

/// Failures surfaced to filesystem callers.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("bad file descriptor")]
    BadDescriptor,

    #[error("access denied")]
    AccessDenied,

    #[error("no such attribute")]
    NoAttribute,

    #[error("result does not fit the caller buffer")]
    Range,

    #[error("operation not supported")]
    Unsupported,

    #[error("invalid argument")]
    InvalidArgument,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Positive errno for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::BadDescriptor => libc::EBADF,
            FsError::AccessDenied => libc::EACCES,
            FsError::NoAttribute => libc::ENODATA,
            FsError::Range => libc::ERANGE,
            FsError::Unsupported => libc::ENOSYS,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::Gateway(_) => libc::EIO,
        }
    }

    /// Negative errno, the shape a raw FUSE reply carries.
    pub fn neg_errno(&self) -> i32 {
        -self.errno()
    }
}
