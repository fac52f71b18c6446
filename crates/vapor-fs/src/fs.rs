//! The path-addressed filesystem state machine.
//!
//! [`FileSystem`] owns the root directory, the descriptor table, and the
//! inode counter. Every operation resolves its path from the root,
//! completes synchronously, and never suspends. Callers are expected to
//! serialize operations (the FUSE session loop invokes one upcall at a
//! time); the internal locks exist so the tree can cross thread
//! boundaries, not to support concurrent mutation.
//!
//! Operations that take a directory handle instead of a path
//! (`mkdir_in`, `open_in`, ...) are the same semantics addressed the way
//! the kernel addresses them; the path forms resolve and delegate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use vapor_core::{ConstantSet, ErrorKind, FsError, FsResult, Timestamp};

use crate::fd::{FdTable, OpenFlags};
use crate::inode::{DirEntry, Inode, InodeRef, Stat};

/// Inode number of the root directory (FUSE convention).
pub const ROOT_INO: u64 = 1;

/// The in-memory filesystem.
pub struct FileSystem {
    root: InodeRef,
    fds: RwLock<FdTable>,
    next_ino: AtomicU64,
    constants: &'static ConstantSet,
}

impl FileSystem {
    /// Creates an empty filesystem using the host constant set.
    pub fn new() -> Self {
        Self::with_constants(ConstantSet::host())
    }

    /// Creates an empty filesystem with an explicit constant set.
    pub fn with_constants(constants: &'static ConstantSet) -> Self {
        let root = Arc::new(RwLock::new(Inode::directory(ROOT_INO, constants)));
        Self {
            root,
            fds: RwLock::new(FdTable::new()),
            next_ino: AtomicU64::new(ROOT_INO + 1),
            constants,
        }
    }

    /// The constant set this filesystem decodes flags and modes with.
    pub fn constants(&self) -> &'static ConstantSet {
        self.constants
    }

    /// The root directory inode.
    pub fn root(&self) -> &InodeRef {
        &self.root
    }

    /// Number of open descriptors.
    pub fn open_fd_count(&self) -> usize {
        self.fds.read().open_count()
    }

    /// Number of descriptor slots held, including interior nulls.
    pub fn fd_slot_count(&self) -> usize {
        self.fds.read().slot_count()
    }

    fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    // ---- path resolution ----

    /// Splits on `/` and drops empty components, collapsing `//` and
    /// leading or trailing separators. `.` and `..` are ordinary names.
    fn split_path(path: &str) -> Vec<&str> {
        path.split('/').filter(|c| !c.is_empty()).collect()
    }

    fn resolve(&self, components: &[&str]) -> Result<InodeRef, ErrorKind> {
        let mut current = Arc::clone(&self.root);
        for component in components {
            let next = {
                let node = current.read();
                let entries = node.dir_entries()?;
                let entry = entries
                    .iter()
                    .find(|e| e.name == *component)
                    .ok_or(ErrorKind::NoEnt)?;
                Arc::clone(&entry.inode)
            };
            current = next;
        }
        Ok(current)
    }

    /// Pops the last component and resolves the prefix to a directory.
    fn parent_of<'a>(&self, components: &[&'a str]) -> Result<(InodeRef, &'a str), ErrorKind> {
        let (last, prefix) = components.split_last().ok_or(ErrorKind::Inval)?;
        let dir = self.resolve(prefix)?;
        if !dir.read().is_dir() {
            return Err(ErrorKind::NotDir);
        }
        Ok((dir, *last))
    }

    /// Resolves a path to its inode.
    pub fn lookup(&self, path: &str) -> FsResult<InodeRef> {
        self.resolve(&Self::split_path(path))
            .map_err(|kind| FsError::new(kind, "lookup", path))
    }

    // ---- directory operations ----

    /// Returns the names of a directory's direct children in insertion
    /// order. No `.` or `..` are synthesized.
    pub fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        const OP: &str = "readdir";
        let node = self
            .resolve(&Self::split_path(path))
            .map_err(|kind| FsError::new(kind, OP, path))?;
        let node = node.read();
        let entries = node
            .dir_entries()
            .map_err(|kind| FsError::new(kind, OP, path))?;
        Ok(entries.iter().map(|e| e.name.clone()).collect())
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&self, path: &str) -> FsResult<()> {
        const OP: &str = "mkdir";
        let components = Self::split_path(path);
        let (dir, name) = self
            .parent_of(&components)
            .map_err(|kind| FsError::new(kind, OP, path))?;
        self.mkdir_in(&dir, name)
            .map(|_| ())
            .map_err(|kind| FsError::new(kind, OP, path))
    }

    /// Creates a directory named `name` inside `dir`.
    pub fn mkdir_in(&self, dir: &InodeRef, name: &str) -> Result<InodeRef, ErrorKind> {
        let mut parent = dir.write();
        let entries = parent.dir_entries_mut()?;
        if entries.iter().any(|e| e.name == name) {
            return Err(ErrorKind::Exist);
        }
        let inode = Arc::new(RwLock::new(Inode::directory(self.alloc_ino(), self.constants)));
        entries.push(DirEntry::new(name, Arc::clone(&inode)));
        parent.touch();
        debug!(name, "mkdir");
        Ok(inode)
    }

    /// Creates a regular file at `path`, or resets the existing one in
    /// place. The `mode` argument is accepted but the default file mode
    /// is applied.
    pub fn create(&self, path: &str, mode: u32) -> FsResult<()> {
        const OP: &str = "create";
        let components = Self::split_path(path);
        let (dir, name) = self
            .parent_of(&components)
            .map_err(|kind| FsError::new(kind, OP, path))?;
        self.create_in(&dir, name, mode)
            .map(|_| ())
            .map_err(|kind| FsError::new(kind, OP, path))
    }

    /// Creates or resets a regular file named `name` inside `dir`.
    pub fn create_in(&self, dir: &InodeRef, name: &str, _mode: u32) -> Result<InodeRef, ErrorKind> {
        let mut parent = dir.write();
        let entries = parent.dir_entries_mut()?;
        if let Some(entry) = entries.iter().find(|e| e.name == name) {
            let inode = Arc::clone(&entry.inode);
            {
                let mut node = inode.write();
                node.file_body_mut().map_err(|_| ErrorKind::Perm)?.reset();
                node.touch();
            }
            debug!(name, "create reset existing file");
            return Ok(inode);
        }
        Ok(self.new_file_entry(entries, name))
    }

    fn new_file_entry(&self, entries: &mut Vec<DirEntry>, name: &str) -> InodeRef {
        let inode = Arc::new(RwLock::new(Inode::file(self.alloc_ino(), self.constants)));
        entries.push(DirEntry::new(name, Arc::clone(&inode)));
        debug!(name, "create");
        inode
    }

    /// Removes the file binding at `path`.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        const OP: &str = "unlink";
        let components = Self::split_path(path);
        let (dir, name) = self
            .parent_of(&components)
            .map_err(|kind| FsError::new(kind, OP, path))?;
        self.unlink_in(&dir, name)
            .map_err(|kind| FsError::new(kind, OP, path))
    }

    /// Removes the file binding named `name` inside `dir`.
    pub fn unlink_in(&self, dir: &InodeRef, name: &str) -> Result<(), ErrorKind> {
        let mut parent = dir.write();
        let entries = parent.dir_entries_mut()?;
        let index = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(ErrorKind::NoEnt)?;
        if entries[index].inode.read().is_dir() {
            return Err(ErrorKind::Perm);
        }
        let removed = entries.remove(index);
        let mut node = removed.inode.write();
        node.nlink = node.nlink.saturating_sub(1);
        debug!(name, nlink = node.nlink, "unlink");
        Ok(())
    }

    /// Removes the empty directory at `path`.
    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        const OP: &str = "rmdir";
        let components = Self::split_path(path);
        let (dir, name) = self
            .parent_of(&components)
            .map_err(|kind| FsError::new(kind, OP, path))?;
        self.rmdir_in(&dir, name)
            .map_err(|kind| FsError::new(kind, OP, path))
    }

    /// Removes the empty directory named `name` inside `dir`.
    pub fn rmdir_in(&self, dir: &InodeRef, name: &str) -> Result<(), ErrorKind> {
        let mut parent = dir.write();
        let entries = parent.dir_entries_mut()?;
        let index = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(ErrorKind::NoEnt)?;
        {
            let child = entries[index].inode.read();
            if !child.dir_entries()?.is_empty() {
                return Err(ErrorKind::NotEmpty);
            }
        }
        let removed = entries.remove(index);
        let mut node = removed.inode.write();
        node.nlink = node.nlink.saturating_sub(1);
        debug!(name, "rmdir");
        Ok(())
    }

    // ---- hard links and rename ----

    /// Creates a second binding for the file at `from` under the path
    /// `to`, sharing the inode.
    pub fn link(&self, from: &str, to: &str) -> FsResult<()> {
        const OP: &str = "link";
        let source = self
            .resolve(&Self::split_path(from))
            .map_err(|kind| FsError::new(kind, OP, from))?;
        let to_components = Self::split_path(to);
        let (dir, name) = self
            .parent_of(&to_components)
            .map_err(|kind| FsError::new(kind, OP, to))?;
        self.link_in(&source, &dir, name).map_err(|kind| match kind {
            ErrorKind::IsDir => FsError::new(kind, OP, from),
            _ => FsError::new(kind, OP, to),
        })
    }

    /// Binds `inode` under `name` inside `dir`. Directories cannot be
    /// hard linked.
    pub fn link_in(&self, inode: &InodeRef, dir: &InodeRef, name: &str) -> Result<(), ErrorKind> {
        if inode.read().is_dir() {
            return Err(ErrorKind::IsDir);
        }
        let mut parent = dir.write();
        let entries = parent.dir_entries_mut()?;
        if entries.iter().any(|e| e.name == name) {
            return Err(ErrorKind::Exist);
        }
        entries.push(DirEntry::new(name, Arc::clone(inode)));
        let mut node = inode.write();
        node.nlink += 1;
        debug!(name, nlink = node.nlink, "link");
        Ok(())
    }

    /// Moves the binding at `from` to `to`, replacing a compatible
    /// existing target.
    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        const OP: &str = "rename";
        let from_components = Self::split_path(from);
        let to_components = Self::split_path(to);
        let (from_dir, from_name) = self
            .parent_of(&from_components)
            .map_err(|kind| FsError::new(kind, OP, from))?;
        let (to_dir, to_name) = self
            .parent_of(&to_components)
            .map_err(|kind| FsError::new(kind, OP, to))?;
        self.rename_in(&from_dir, from_name, &to_dir, to_name)
            .map_err(|kind| match kind {
                ErrorKind::NoEnt => FsError::new(kind, OP, from),
                _ => FsError::new(kind, OP, to),
            })
    }

    /// Moves the binding `from_name` in `from_dir` to `to_name` in
    /// `to_dir`. The whole move is performed under the parents' locks, so
    /// no observer sees both bindings or neither.
    pub fn rename_in(
        &self,
        from_dir: &InodeRef,
        from_name: &str,
        to_dir: &InodeRef,
        to_name: &str,
    ) -> Result<(), ErrorKind> {
        let same_dir = Arc::ptr_eq(from_dir, to_dir);
        if same_dir && from_name == to_name {
            // Renaming a binding onto itself: verify it exists, change nothing.
            let parent = from_dir.read();
            let entries = parent.dir_entries()?;
            return if entries.iter().any(|e| e.name == from_name) {
                Ok(())
            } else {
                Err(ErrorKind::NoEnt)
            };
        }

        if same_dir {
            let mut parent = from_dir.write();
            let entries = parent.dir_entries_mut()?;
            let from_index = entries
                .iter()
                .position(|e| e.name == from_name)
                .ok_or(ErrorKind::NoEnt)?;
            let source_is_dir = entries[from_index].inode.read().is_dir();
            if let Some(to_index) = entries.iter().position(|e| e.name == to_name) {
                Self::check_replace(&entries[to_index], source_is_dir)?;
                let displaced = entries.remove(to_index);
                let mut node = displaced.inode.write();
                node.nlink = node.nlink.saturating_sub(1);
            }
            let from_index = entries
                .iter()
                .position(|e| e.name == from_name)
                .ok_or(ErrorKind::NoEnt)?;
            let mut moved = entries.remove(from_index);
            moved.name = to_name.to_string();
            entries.push(moved);
            parent.touch();
        } else {
            // Lock both parents for the whole move; address order keeps
            // the acquisition consistent.
            let (mut from_guard, mut to_guard) = if Arc::as_ptr(from_dir) < Arc::as_ptr(to_dir) {
                let from_guard = from_dir.write();
                (from_guard, to_dir.write())
            } else {
                let to_guard = to_dir.write();
                (from_dir.write(), to_guard)
            };
            let from_index = from_guard
                .dir_entries()?
                .iter()
                .position(|e| e.name == from_name)
                .ok_or(ErrorKind::NoEnt)?;
            let source_is_dir = from_guard.dir_entries()?[from_index].inode.read().is_dir();
            let to_index = to_guard
                .dir_entries()?
                .iter()
                .position(|e| e.name == to_name);
            if let Some(to_index) = to_index {
                Self::check_replace(&to_guard.dir_entries()?[to_index], source_is_dir)?;
                let displaced = to_guard.dir_entries_mut()?.remove(to_index);
                let mut node = displaced.inode.write();
                node.nlink = node.nlink.saturating_sub(1);
            }
            let mut moved = from_guard.dir_entries_mut()?.remove(from_index);
            moved.name = to_name.to_string();
            to_guard.dir_entries_mut()?.push(moved);
            let now = Timestamp::now();
            from_guard.mtime = now;
            from_guard.ctime = now;
            to_guard.mtime = now;
            to_guard.ctime = now;
        }
        debug!(from_name, to_name, "rename");
        Ok(())
    }

    /// Replacement rules for a rename target that already exists.
    fn check_replace(target: &DirEntry, source_is_dir: bool) -> Result<(), ErrorKind> {
        let node = target.inode.read();
        if node.is_dir() {
            if !source_is_dir {
                return Err(ErrorKind::IsDir);
            }
            if !node.dir_entries()?.is_empty() {
                return Err(ErrorKind::NotEmpty);
            }
            Ok(())
        } else if source_is_dir {
            Err(ErrorKind::NotDir)
        } else {
            Ok(())
        }
    }

    // ---- extended attributes ----

    fn with_entry<R>(
        &self,
        path: &str,
        op: &'static str,
        f: impl FnOnce(&mut DirEntry) -> R,
    ) -> FsResult<R> {
        let components = Self::split_path(path);
        let run = || -> Result<R, ErrorKind> {
            let (dir, name) = self.parent_of(&components)?;
            let mut parent = dir.write();
            let entries = parent.dir_entries_mut()?;
            let entry = entries
                .iter_mut()
                .find(|e| e.name == name)
                .ok_or(ErrorKind::NoEnt)?;
            Ok(f(entry))
        };
        run().map_err(|kind| FsError::new(kind, op, path))
    }

    /// Sets or overwrites an extended attribute on the entry at `path`.
    pub fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        self.with_entry(path, "setxattr", |entry| entry.set_xattr(name, value))
    }

    /// Returns an extended attribute value, or `None` when absent.
    pub fn getxattr(&self, path: &str, name: &str) -> FsResult<Option<Vec<u8>>> {
        self.with_entry(path, "getxattr", |entry| {
            entry.xattr(name).map(|v| v.to_vec())
        })
    }

    /// Lists extended attribute names in insertion order.
    pub fn listxattr(&self, path: &str) -> FsResult<Vec<String>> {
        self.with_entry(path, "listxattr", |entry| entry.xattr_names())
    }

    /// Removes an extended attribute. Silent when absent.
    pub fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.with_entry(path, "removexattr", |entry| entry.remove_xattr(name))
    }

    // ---- descriptors ----

    /// Opens the file at `path` with decoded flags, returning the
    /// descriptor id. The `mode` argument is accepted for a created file
    /// but the default file mode is applied.
    pub fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> FsResult<u32> {
        const OP: &str = "open";
        let components = Self::split_path(path);
        let (dir, name) = self
            .parent_of(&components)
            .map_err(|kind| FsError::new(kind, OP, path))?;
        self.open_in(&dir, name, flags, mode)
            .map_err(|kind| FsError::new(kind, OP, path))
    }

    /// Opens with a textual flag form such as `"r+"` or `"a"`.
    pub fn open_str(&self, path: &str, flags: &str, mode: u32) -> FsResult<u32> {
        let decoded = OpenFlags::from_str(flags, self.constants)
            .ok_or_else(|| FsError::new(ErrorKind::Inval, "open", path))?;
        self.open(path, decoded, mode)
    }

    /// Opens the entry named `name` inside `dir`.
    ///
    /// Decision table: a non-regular entry fails EPERM; O_EXCL on an
    /// existing entry fails EEXIST; write access without O_APPEND resets
    /// an existing file; a missing entry is created only with write
    /// access and O_CREAT, otherwise ENOENT.
    pub fn open_in(
        &self,
        dir: &InodeRef,
        name: &str,
        flags: OpenFlags,
        _mode: u32,
    ) -> Result<u32, ErrorKind> {
        let inode = {
            let mut parent = dir.write();
            let entries = parent.dir_entries_mut()?;
            match entries.iter().find(|e| e.name == name) {
                Some(entry) => {
                    let inode = Arc::clone(&entry.inode);
                    {
                        let mut node = inode.write();
                        if !node.is_file() {
                            return Err(ErrorKind::Perm);
                        }
                        if flags.exclusive {
                            return Err(ErrorKind::Exist);
                        }
                        if flags.writable && !flags.appending {
                            node.file_body_mut()?.reset();
                            node.touch();
                        }
                    }
                    inode
                }
                None => {
                    if !flags.writable || !flags.creating {
                        return Err(ErrorKind::NoEnt);
                    }
                    self.new_file_entry(entries, name)
                }
            }
        };
        let position = if flags.appending {
            inode.read().file_body()?.size()
        } else {
            0
        };
        let id = self.fds.write().allocate(inode, position, flags);
        debug!(fd = id, name, "open");
        Ok(id)
    }

    /// Closes a descriptor.
    pub fn close(&self, fd: u32) -> FsResult<()> {
        self.fds
            .write()
            .release(fd)
            .map(|_| ())
            .map_err(|kind| FsError::new(kind, "close", fd.to_string()))
    }

    /// Reads from a descriptor into `buf`, returning the byte count.
    /// A supplied `position` moves the descriptor there first (pread);
    /// the position then advances by the bytes read. Updates atime.
    pub fn read_fd(&self, fd: u32, buf: &mut [u8], position: Option<u64>) -> FsResult<usize> {
        const OP: &str = "read";
        let mut fds = self.fds.write();
        let descriptor = fds
            .get_mut(fd)
            .ok_or_else(|| FsError::new(ErrorKind::BadF, OP, fd.to_string()))?;
        if let Some(position) = position {
            descriptor.position = position;
        }
        let read = {
            let mut node = descriptor.inode.write();
            node.atime = Timestamp::now();
            node.file_body()
                .map_err(|kind| FsError::new(kind, OP, fd.to_string()))?
                .read_at(descriptor.position, buf)
        };
        descriptor.position += read as u64;
        Ok(read)
    }

    /// Writes `data` through a descriptor, returning `data.len()`.
    /// A supplied `position` moves the descriptor there first (pwrite);
    /// the position then advances by the bytes written. Updates mtime.
    pub fn write_fd(&self, fd: u32, data: &[u8], position: Option<u64>) -> FsResult<usize> {
        const OP: &str = "write";
        let mut fds = self.fds.write();
        let descriptor = fds
            .get_mut(fd)
            .ok_or_else(|| FsError::new(ErrorKind::BadF, OP, fd.to_string()))?;
        if let Some(position) = position {
            descriptor.position = position;
        }
        let written = {
            let mut node = descriptor.inode.write();
            let written = node
                .file_body_mut()
                .map_err(|kind| FsError::new(kind, OP, fd.to_string()))?
                .write_at(descriptor.position, data);
            node.touch();
            written
        };
        descriptor.position += written as u64;
        Ok(written)
    }

    // ---- metadata ----

    /// Returns the stat record for the object at `path`.
    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        let node = self
            .resolve(&Self::split_path(path))
            .map_err(|kind| FsError::new(kind, "stat", path))?;
        let stat = node.read().stat();
        Ok(stat)
    }

    /// Returns the stat record for the inode bound to a descriptor.
    pub fn fstat(&self, fd: u32) -> FsResult<Stat> {
        let fds = self.fds.read();
        let descriptor = fds
            .get(fd)
            .ok_or_else(|| FsError::new(ErrorKind::NoEnt, "fstat", fd.to_string()))?;
        let stat = descriptor.inode.read().stat();
        Ok(stat)
    }

    /// Sets the logical size of the file at `path`.
    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        const OP: &str = "truncate";
        let node = self
            .resolve(&Self::split_path(path))
            .map_err(|kind| FsError::new(kind, OP, path))?;
        let mut node = node.write();
        node.file_body_mut()
            .map_err(|kind| FsError::new(kind, OP, path))?
            .truncate(size);
        node.touch();
        Ok(())
    }

    /// Sets the logical size of the file bound to a descriptor.
    pub fn ftruncate(&self, fd: u32, size: u64) -> FsResult<()> {
        const OP: &str = "ftruncate";
        let inode = {
            let fds = self.fds.read();
            let descriptor = fds
                .get(fd)
                .ok_or_else(|| FsError::new(ErrorKind::NoEnt, OP, fd.to_string()))?;
            Arc::clone(&descriptor.inode)
        };
        let mut node = inode.write();
        node.file_body_mut()
            .map_err(|kind| FsError::new(kind, OP, fd.to_string()))?
            .truncate(size);
        node.touch();
        Ok(())
    }

    /// Replaces permission bits, preserving the type bit.
    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let node = self
            .resolve(&Self::split_path(path))
            .map_err(|kind| FsError::new(kind, "chmod", path))?;
        node.write().set_mode(mode, self.constants);
        Ok(())
    }

    /// Overwrites ownership.
    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let node = self
            .resolve(&Self::split_path(path))
            .map_err(|kind| FsError::new(kind, "chown", path))?;
        node.write().set_owner(uid, gid);
        Ok(())
    }

    /// Overwrites access and modification times. Accepts millisecond
    /// integers or timestamps.
    pub fn utimes(
        &self,
        path: &str,
        atime: impl Into<Timestamp>,
        mtime: impl Into<Timestamp>,
    ) -> FsResult<()> {
        let node = self
            .resolve(&Self::split_path(path))
            .map_err(|kind| FsError::new(kind, "utimes", path))?;
        node.write().set_times(atime.into(), mtime.into());
        Ok(())
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vapor_core::constants::LINUX;
    use vapor_core::FD_BASE;

    fn fs() -> FileSystem {
        FileSystem::with_constants(&LINUX)
    }

    #[test]
    fn test_path_splitting_collapses_separators() {
        let fs = fs();
        fs.mkdir("/a").unwrap();
        fs.mkdir("//a//b/").unwrap();
        assert_eq!(fs.readdir("/a").unwrap(), vec!["b"]);
        assert!(fs.lookup("a/b/").is_ok());
    }

    #[test]
    fn test_lookup_errors() {
        let fs = fs();
        fs.create("/f", 0).unwrap();
        let err = fs.lookup("/missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoEnt);
        let err = fs.lookup("/f/inside").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotDir);
    }

    #[test]
    fn test_mkdir_on_root_is_invalid() {
        let fs = fs();
        assert_eq!(fs.mkdir("/").unwrap_err().kind, ErrorKind::Inval);
    }

    #[test]
    fn test_mkdir_existing_name() {
        let fs = fs();
        fs.mkdir("/a").unwrap();
        assert_eq!(fs.mkdir("/a").unwrap_err().kind, ErrorKind::Exist);
    }

    #[test]
    fn test_create_resets_existing_file() {
        let fs = fs();
        let fd = fs.open_str("/f", "w", 0).unwrap();
        fs.write_fd(fd, b"old contents", None).unwrap();
        fs.close(fd).unwrap();

        fs.create("/f", 0).unwrap();
        assert_eq!(fs.stat("/f").unwrap().size, 0);
    }

    #[test]
    fn test_create_over_directory_is_denied() {
        let fs = fs();
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.create("/d", 0).unwrap_err().kind, ErrorKind::Perm);
    }

    #[test]
    fn test_unlink_directory_is_denied() {
        let fs = fs();
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.unlink("/d").unwrap_err().kind, ErrorKind::Perm);
    }

    #[test]
    fn test_rmdir_errors() {
        let fs = fs();
        fs.create("/f", 0).unwrap();
        fs.mkdir("/d").unwrap();
        fs.mkdir("/d/x").unwrap();

        assert_eq!(fs.rmdir("/missing").unwrap_err().kind, ErrorKind::NoEnt);
        assert_eq!(fs.rmdir("/f").unwrap_err().kind, ErrorKind::NotDir);
        assert_eq!(fs.rmdir("/d").unwrap_err().kind, ErrorKind::NotEmpty);

        fs.rmdir("/d/x").unwrap();
        fs.rmdir("/d").unwrap();
        assert_eq!(fs.lookup("/d").unwrap_err().kind, ErrorKind::NoEnt);
    }

    #[test]
    fn test_open_exclusive_on_existing() {
        let fs = fs();
        fs.create("/f", 0).unwrap();
        let err = fs.open_str("/f", "wx", 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Exist);
    }

    #[test]
    fn test_open_read_only_missing() {
        let fs = fs();
        assert_eq!(fs.open_str("/f", "r", 0).unwrap_err().kind, ErrorKind::NoEnt);
    }

    #[test]
    fn test_open_missing_without_create() {
        let fs = fs();
        let flags = OpenFlags::from_bits(LINUX.o_rdwr, &LINUX);
        assert_eq!(fs.open("/f", flags, 0).unwrap_err().kind, ErrorKind::NoEnt);
    }

    #[test]
    fn test_open_directory_is_denied() {
        let fs = fs();
        fs.mkdir("/d").unwrap();
        assert_eq!(fs.open_str("/d", "r", 0).unwrap_err().kind, ErrorKind::Perm);
    }

    #[test]
    fn test_open_for_write_resets_existing() {
        let fs = fs();
        let fd = fs.open_str("/f", "w", 0).unwrap();
        fs.write_fd(fd, b"hello", None).unwrap();
        fs.close(fd).unwrap();

        // Write access without append resets, even via r+.
        let fd = fs.open_str("/f", "r+", 0).unwrap();
        assert_eq!(fs.fstat(fd).unwrap().size, 0);
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_open_append_preserves_and_positions_at_end() {
        let fs = fs();
        let fd = fs.open_str("/f", "w", 0).unwrap();
        fs.write_fd(fd, b"abc", None).unwrap();
        fs.close(fd).unwrap();

        let fd = fs.open_str("/f", "a", 0).unwrap();
        fs.write_fd(fd, b"def", None).unwrap();
        fs.close(fd).unwrap();

        let fd = fs.open_str("/f", "r", 0).unwrap();
        let mut buf = [0u8; 8];
        let n = fs.read_fd(fd, &mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"abcdef");
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_sequential_reads_advance_position() {
        let fs = fs();
        let fd = fs.open_str("/f", "w+", 0).unwrap();
        fs.write_fd(fd, b"abcdef", None).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(fs.read_fd(fd, &mut buf, Some(0)).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(fs.read_fd(fd, &mut buf, None).unwrap(), 3);
        assert_eq!(&buf, b"def");
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_positioned_read_moves_position() {
        let fs = fs();
        let fd = fs.open_str("/f", "w+", 0).unwrap();
        fs.write_fd(fd, b"abcdef", None).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(fs.read_fd(fd, &mut buf, Some(2)).unwrap(), 2);
        assert_eq!(&buf, b"cd");
        // The supplied position sticks: the next plain read continues.
        assert_eq!(fs.read_fd(fd, &mut buf, None).unwrap(), 2);
        assert_eq!(&buf, b"ef");
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_close_errors() {
        let fs = fs();
        assert_eq!(fs.close(FD_BASE).unwrap_err().kind, ErrorKind::BadF);
        assert_eq!(fs.close(3).unwrap_err().kind, ErrorKind::BadF);

        let fd = fs.open_str("/f", "w", 0).unwrap();
        fs.close(fd).unwrap();
        assert_eq!(fs.close(fd).unwrap_err().kind, ErrorKind::BadF);
        assert_eq!(fs.read_fd(fd, &mut [0u8; 1], None).unwrap_err().kind, ErrorKind::BadF);
        assert_eq!(fs.fstat(fd).unwrap_err().kind, ErrorKind::NoEnt);
    }

    #[test]
    fn test_fd_table_compacts_after_close() {
        let fs = fs();
        let a = fs.open_str("/a", "w", 0).unwrap();
        let b = fs.open_str("/b", "w", 0).unwrap();
        let c = fs.open_str("/c", "w", 0).unwrap();
        assert_eq!(fs.open_fd_count(), 3);

        fs.close(a).unwrap();
        fs.close(c).unwrap();
        fs.close(b).unwrap();
        assert_eq!(fs.open_fd_count(), 0);
        assert_eq!(fs.fd_slot_count(), 0);
    }

    #[test]
    fn test_unlink_keeps_data_reachable_through_fd() {
        let fs = fs();
        let fd = fs.open_str("/f", "w+", 0).unwrap();
        fs.write_fd(fd, b"still here", None).unwrap();

        fs.unlink("/f").unwrap();
        assert_eq!(fs.lookup("/f").unwrap_err().kind, ErrorKind::NoEnt);

        let mut buf = [0u8; 16];
        let n = fs.read_fd(fd, &mut buf, Some(0)).unwrap();
        assert_eq!(&buf[..n], b"still here");
        assert_eq!(fs.fstat(fd).unwrap().nlink, 0);
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_rename_same_directory() {
        let fs = fs();
        fs.create("/a", 0).unwrap();
        fs.rename("/a", "/b").unwrap();
        assert_eq!(fs.lookup("/a").unwrap_err().kind, ErrorKind::NoEnt);
        assert!(fs.lookup("/b").is_ok());
    }

    #[test]
    fn test_rename_onto_itself_is_a_no_op() {
        let fs = fs();
        fs.create("/a", 0).unwrap();
        fs.rename("/a", "/a").unwrap();
        assert_eq!(fs.stat("/a").unwrap().nlink, 1);
        assert_eq!(fs.readdir("/").unwrap(), vec!["a"]);
    }

    #[test]
    fn test_rename_missing_source() {
        let fs = fs();
        let err = fs.rename("/missing", "/b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoEnt);
        assert_eq!(err.path, "/missing");
    }

    #[test]
    fn test_rename_type_mismatch() {
        let fs = fs();
        fs.create("/f", 0).unwrap();
        fs.mkdir("/d").unwrap();

        assert_eq!(fs.rename("/f", "/d").unwrap_err().kind, ErrorKind::IsDir);
        assert_eq!(fs.rename("/d", "/f").unwrap_err().kind, ErrorKind::NotDir);
    }

    #[test]
    fn test_rename_over_empty_directory() {
        let fs = fs();
        fs.mkdir("/d1").unwrap();
        fs.mkdir("/d2").unwrap();
        fs.rename("/d1", "/d2").unwrap();
        assert_eq!(fs.lookup("/d1").unwrap_err().kind, ErrorKind::NoEnt);
        assert!(fs.lookup("/d2").is_ok());
    }

    #[test]
    fn test_rename_moves_across_directories() {
        let fs = fs();
        fs.mkdir("/src").unwrap();
        fs.mkdir("/dst").unwrap();
        fs.create("/src/f", 0).unwrap();

        fs.rename("/src/f", "/dst/g").unwrap();
        assert_eq!(fs.readdir("/src").unwrap(), Vec::<String>::new());
        assert_eq!(fs.readdir("/dst").unwrap(), vec!["g"]);
    }

    #[test]
    fn test_error_messages_name_the_operation() {
        let fs = fs();
        let err = fs.open_str("/nope", "r", 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ENOENT: no such file or directory, open '/nope'"
        );
        let err = fs.mkdir("/").unwrap_err();
        assert_eq!(err.to_string(), "EINVAL: invalid argument, mkdir '/'");
    }

    #[test]
    fn test_chmod_chown_utimes() {
        let fs = fs();
        fs.create("/f", 0).unwrap();

        fs.chmod("/f", 0o600).unwrap();
        let stat = fs.stat("/f").unwrap();
        assert_eq!(stat.mode & 0o7777, 0o600);
        assert!(LINUX.is_reg(stat.mode));

        fs.chown("/f", 1000, 1000).unwrap();
        let stat = fs.stat("/f").unwrap();
        assert_eq!((stat.uid, stat.gid), (1000, 1000));

        fs.utimes("/f", 1_000_i64, 2_000_i64).unwrap();
        let stat = fs.stat("/f").unwrap();
        assert_eq!(stat.atime.as_millis(), 1_000);
        assert_eq!(stat.mtime.as_millis(), 2_000);
    }

    #[test]
    fn test_inode_numbers_are_unique_and_monotonic() {
        let fs = fs();
        fs.create("/a", 0).unwrap();
        fs.mkdir("/d").unwrap();
        fs.create("/d/b", 0).unwrap();

        let a = fs.stat("/a").unwrap().ino;
        let d = fs.stat("/d").unwrap().ino;
        let b = fs.stat("/d/b").unwrap().ino;
        assert!(ROOT_INO < a && a < d && d < b);

        // Removal does not recycle numbers.
        fs.unlink("/a").unwrap();
        fs.create("/c", 0).unwrap();
        assert!(fs.stat("/c").unwrap().ino > b);
    }

    #[test]
    fn test_xattr_operations() {
        let fs = fs();
        fs.create("/f", 0).unwrap();

        fs.setxattr("/f", "user.k", b"v").unwrap();
        assert_eq!(fs.getxattr("/f", "user.k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(fs.listxattr("/f").unwrap(), vec!["user.k"]);

        assert_eq!(fs.getxattr("/f", "user.other").unwrap(), None);
        fs.removexattr("/f", "user.k").unwrap();
        assert_eq!(fs.listxattr("/f").unwrap(), Vec::<String>::new());
        // Removing an absent attribute stays silent.
        fs.removexattr("/f", "user.k").unwrap();

        assert_eq!(
            fs.setxattr("/", "user.k", b"v").unwrap_err().kind,
            ErrorKind::Inval
        );
    }
}
