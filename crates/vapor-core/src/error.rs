//! Errno-level error taxonomy.
//!
//! Every failure the filesystem raises carries one of eight kinds. Each
//! kind maps to a fixed negative errno integer, which is the value the
//! operation adapter hands back in its error callback. Messages render as
//! `"<CODE>: <reason>, <method> '<name>'"`.

use thiserror::Error;

/// The failure kinds the filesystem can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// Operation not permitted: unlinking a directory, opening a
    /// non-regular entry.
    #[error("EPERM: operation not permitted")]
    Perm,
    /// A path component is missing, or a descriptor is absent for a
    /// non-open descriptor operation.
    #[error("ENOENT: no such file or directory")]
    NoEnt,
    /// A descriptor slot is null or out of range.
    #[error("EBADF: bad file descriptor")]
    BadF,
    /// The target name is already bound.
    #[error("EEXIST: file already exists")]
    Exist,
    /// Traversal through, or a directory operation on, a non-directory.
    #[error("ENOTDIR: not a directory")]
    NotDir,
    /// A file operation on a directory.
    #[error("EISDIR: illegal operation on a directory")]
    IsDir,
    /// A path with no last component where one is required.
    #[error("EINVAL: invalid argument")]
    Inval,
    /// Removing or replacing a directory that still has children.
    #[error("ENOTEMPTY: directory not empty")]
    NotEmpty,
}

impl ErrorKind {
    /// The symbolic errno name.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::Perm => "EPERM",
            ErrorKind::NoEnt => "ENOENT",
            ErrorKind::BadF => "EBADF",
            ErrorKind::Exist => "EEXIST",
            ErrorKind::NotDir => "ENOTDIR",
            ErrorKind::IsDir => "EISDIR",
            ErrorKind::Inval => "EINVAL",
            ErrorKind::NotEmpty => "ENOTEMPTY",
        }
    }

    /// The negative errno integer reported at the adapter boundary.
    ///
    /// The numbering is part of the adapter contract and is fixed; it is
    /// not the host kernel's errno table.
    pub const fn errno(self) -> i32 {
        match self {
            ErrorKind::Perm => -1,
            ErrorKind::NoEnt => -2,
            ErrorKind::BadF => -9,
            ErrorKind::Exist => -17,
            ErrorKind::NotDir => -20,
            ErrorKind::IsDir => -21,
            ErrorKind::Inval => -23,
            ErrorKind::NotEmpty => -66,
        }
    }
}

/// A filesystem failure: the kind plus the operation and name it was
/// raised for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}, {op} '{path}'")]
pub struct FsError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// The operation that raised the failure.
    pub op: &'static str,
    /// The path or descriptor the operation was addressed to.
    pub path: String,
}

impl FsError {
    /// Creates an error for `op` addressed to `path`.
    pub fn new(kind: ErrorKind, op: &'static str, path: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            path: path.into(),
        }
    }

    /// The negative errno integer for this failure.
    pub fn errno(&self) -> i32 {
        self.kind.errno()
    }
}

/// Result alias used throughout the filesystem surface.
pub type FsResult<T> = Result<T, FsError>;
