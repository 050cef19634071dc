//! Error types for DocFS Core

use libc::c_int;

use crate::codec::CodecError;
use crate::document::DocumentStoreError;

/// Core filesystem error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name not allowed")]
    InvalidName,
    #[error("bad file handle")]
    BadHandle,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("file too large")]
    FileTooLarge,
    #[error("corrupt content: {0}")]
    CorruptContent(#[from] CodecError),
    #[error("backend error: {0}")]
    Backend(#[from] DocumentStoreError),
}

impl FsError {
    /// POSIX error code reported to the kernel for this error.
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::InvalidName => libc::EINVAL,
            FsError::BadHandle => libc::EBADF,
            FsError::TooManyOpenFiles => libc::EMFILE,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::CorruptContent(_) => libc::EIO,
            FsError::Backend(_) => libc::EIO,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
