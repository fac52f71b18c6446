//! Vapor Filesystem - an in-memory POSIX-style filesystem served over FUSE.
//!
//! The whole namespace lives in RAM: directory entries bind names to
//! shared inodes (hard links), file bodies are sparse vectors of 1 MiB
//! blocks, and open files go through a descriptor table with POSIX
//! open-flag semantics. Nothing is persisted; unmounting discards the
//! tree.
//!
//! [`FileSystem`] is the path-addressed core. [`VaporFilesystem`] adapts
//! it to the kernel's inode-addressed FUSE upcalls, and [`mount`] /
//! [`spawn_mount`] attach it to a mount point.

#![warn(missing_docs, rust_2018_idioms)]

pub mod bridge;
pub mod fd;
pub mod fs;
pub mod inode;
pub mod mount;

pub use bridge::VaporFilesystem;
pub use fd::{FdTable, FileDescriptor, OpenFlags};
pub use fs::{FileSystem, ROOT_INO};
pub use inode::{DirEntry, FileBody, Inode, InodeBody, InodeRef, Stat};
pub use mount::{mount, spawn_mount, MountConfig, MountError};
