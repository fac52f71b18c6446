//! FUSE bridge: adapts kernel upcalls to the filesystem core.
//!
//! The kernel addresses objects by inode number; the core is
//! path-and-entry addressed. The bridge keeps a node table mapping each
//! surfaced inode number to the inode handle plus the (parent, name)
//! binding it was looked up under. Every mutation flows through the
//! bridge, so the table stays coherent: `rename` updates the moved
//! binding, `forget` drops entries the kernel is done with.
//!
//! Failures convert to errno at this boundary. The taxonomy's fixed
//! negative numbering is the adapter contract; the kernel only
//! understands the host's errno table, so replies use the matching
//! `libc` constants.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tracing::debug;
use vapor_core::{ErrorKind, Timestamp};

use crate::fd::OpenFlags;
use crate::fs::{FileSystem, ROOT_INO};
use crate::inode::{DirEntry, InodeRef, Stat};

/// TTL for cached attributes.
const TTL: Duration = Duration::from_secs(1);

/// Fixed placeholder for every statfs field; unrelated to actual usage.
const STATFS_PLACEHOLDER: u64 = 1_000_000;

#[cfg(target_os = "macos")]
const NO_XATTR: i32 = libc::ENOATTR;
#[cfg(not(target_os = "macos"))]
const NO_XATTR: i32 = libc::ENODATA;

/// A node the kernel holds a reference to.
struct NodeHandle {
    inode: InodeRef,
    /// Directory the node was surfaced under.
    parent: InodeRef,
    /// Entry name within that directory. Empty for the root.
    name: String,
    /// Outstanding kernel lookups; the handle drops at zero.
    lookups: u64,
}

/// The FUSE-facing filesystem.
pub struct VaporFilesystem {
    fs: FileSystem,
    nodes: HashMap<u64, NodeHandle>,
}

impl VaporFilesystem {
    /// Wraps a filesystem core for mounting.
    pub fn new(fs: FileSystem) -> Self {
        let root = Arc::clone(fs.root());
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            NodeHandle {
                inode: Arc::clone(&root),
                parent: root,
                name: String::new(),
                lookups: 1,
            },
        );
        Self { fs, nodes }
    }

    /// The wrapped core.
    pub fn filesystem(&self) -> &FileSystem {
        &self.fs
    }

    /// Host errno for a failure kind. The kernel cannot interpret the
    /// adapter's fixed negative table, so replies use the platform's
    /// numbering.
    fn errno(kind: ErrorKind) -> i32 {
        match kind {
            ErrorKind::Perm => libc::EPERM,
            ErrorKind::NoEnt => libc::ENOENT,
            ErrorKind::BadF => libc::EBADF,
            ErrorKind::Exist => libc::EEXIST,
            ErrorKind::NotDir => libc::ENOTDIR,
            ErrorKind::IsDir => libc::EISDIR,
            ErrorKind::Inval => libc::EINVAL,
            ErrorKind::NotEmpty => libc::ENOTEMPTY,
        }
    }

    fn system_time(ts: Timestamp) -> SystemTime {
        ts.to_system_time().unwrap_or(UNIX_EPOCH)
    }

    fn time_or_now(value: TimeOrNow) -> Timestamp {
        match value {
            TimeOrNow::SpecificTime(time) => Timestamp::from_system_time(time),
            TimeOrNow::Now => Timestamp::now(),
        }
    }

    /// Converts a stat record to kernel file attributes.
    fn attr(&self, stat: &Stat) -> FileAttr {
        let constants = self.fs.constants();
        let kind = if constants.is_dir(stat.mode) {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        FileAttr {
            ino: stat.ino,
            size: stat.size,
            blocks: stat.blocks,
            atime: Self::system_time(stat.atime),
            mtime: Self::system_time(stat.mtime),
            ctime: Self::system_time(stat.ctime),
            crtime: Self::system_time(stat.ctime),
            kind,
            perm: (stat.mode & 0o7777) as u16,
            nlink: stat.nlink,
            uid: stat.uid,
            gid: stat.gid,
            rdev: stat.rdev as u32,
            blksize: 4096,
            flags: 0,
        }
    }

    /// Records (or re-records) a kernel reference to `inode` surfaced
    /// under `parent`/`name`, returning the inode number.
    fn register(&mut self, parent: &InodeRef, name: &str, inode: InodeRef) -> u64 {
        let ino = inode.read().ino;
        match self.nodes.entry(ino) {
            MapEntry::Occupied(mut occupied) => {
                let handle = occupied.get_mut();
                handle.lookups += 1;
                handle.inode = inode;
                handle.parent = Arc::clone(parent);
                handle.name = name.to_string();
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(NodeHandle {
                    inode,
                    parent: Arc::clone(parent),
                    name: name.to_string(),
                    lookups: 1,
                });
            }
        }
        ino
    }

    fn node_inode(&self, ino: u64) -> Option<InodeRef> {
        self.nodes.get(&ino).map(|n| Arc::clone(&n.inode))
    }

    /// Drops `nlookup` kernel references; the handle goes away at zero.
    fn forget_node(&mut self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        if let Some(handle) = self.nodes.get_mut(&ino) {
            handle.lookups = handle.lookups.saturating_sub(nlookup);
            if handle.lookups == 0 {
                self.nodes.remove(&ino);
            }
        }
    }

    /// Runs `f` on the directory entry a node was surfaced under.
    ///
    /// The root has no entry, so entry-addressed operations on it fail
    /// EINVAL. A handle whose binding was replaced by a later rename no
    /// longer matches (the inode pointers differ) and reads as ENOENT.
    fn with_entry<R>(&self, ino: u64, f: impl FnOnce(&mut DirEntry) -> R) -> Result<R, ErrorKind> {
        let handle = self.nodes.get(&ino).ok_or(ErrorKind::NoEnt)?;
        if handle.name.is_empty() {
            return Err(ErrorKind::Inval);
        }
        let mut parent = handle.parent.write();
        let entries = parent.dir_entries_mut()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.name == handle.name && Arc::ptr_eq(&e.inode, &handle.inode))
            .ok_or(ErrorKind::NoEnt)?;
        Ok(f(entry))
    }

    fn reply_xattr(data: &[u8], size: u32, reply: ReplyXattr) {
        if size == 0 {
            reply.size(data.len() as u32);
        } else if data.len() as u32 <= size {
            reply.data(data);
        } else {
            reply.error(libc::ERANGE);
        }
    }
}

impl Filesystem for VaporFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_string_lossy().into_owned();
        debug!(parent, name = %name, "lookup");

        let Some(parent_inode) = self.node_inode(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child = {
            let node = parent_inode.read();
            match node.dir_entries() {
                Ok(entries) => entries
                    .iter()
                    .find(|e| e.name == name)
                    .map(|e| Arc::clone(&e.inode)),
                Err(kind) => {
                    reply.error(Self::errno(kind));
                    return;
                }
            }
        };
        match child {
            Some(inode) => {
                let stat = inode.read().stat();
                self.register(&parent_inode, &name, inode);
                reply.entry(&TTL, &self.attr(&stat), 0);
            }
            None => reply.error(libc::ENOENT),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.forget_node(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        debug!(ino, "getattr");
        match self.node_inode(ino) {
            Some(inode) => {
                let stat = inode.read().stat();
                reply.attr(&TTL, &self.attr(&stat));
            }
            None => reply.error(libc::ENOENT),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(ino, ?mode, ?size, "setattr");
        let Some(inode) = self.node_inode(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if let Some(size) = size {
            let result = match fh {
                Some(fh) => self.fs.ftruncate(fh as u32, size).map_err(|e| e.kind),
                None => {
                    let mut node = inode.write();
                    let result = node.file_body_mut().map(|body| body.truncate(size));
                    if result.is_ok() {
                        node.touch();
                    }
                    result
                }
            };
            if let Err(kind) = result {
                reply.error(Self::errno(kind));
                return;
            }
        }

        {
            let mut node = inode.write();
            if let Some(mode) = mode {
                node.set_mode(mode, self.fs.constants());
            }
            if uid.is_some() || gid.is_some() {
                let uid = uid.unwrap_or(node.uid);
                let gid = gid.unwrap_or(node.gid);
                node.set_owner(uid, gid);
            }
            if let Some(atime) = atime {
                node.atime = Self::time_or_now(atime);
            }
            if let Some(mtime) = mtime {
                node.mtime = Self::time_or_now(mtime);
            }
        }

        let stat = inode.read().stat();
        reply.attr(&TTL, &self.attr(&stat));
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_string_lossy().into_owned();
        debug!(parent, name = %name, mode, "mkdir");

        let Some(parent_inode) = self.node_inode(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.mkdir_in(&parent_inode, &name) {
            Ok(inode) => {
                let stat = inode.read().stat();
                self.register(&parent_inode, &name, inode);
                reply.entry(&TTL, &self.attr(&stat), 0);
            }
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        debug!(parent, name = %name, "unlink");

        let Some(parent_inode) = self.node_inode(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.unlink_in(&parent_inode, &name) {
            Ok(()) => reply.ok(),
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        debug!(parent, name = %name, "rmdir");

        let Some(parent_inode) = self.node_inode(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.rmdir_in(&parent_inode, &name) {
            Ok(()) => reply.ok(),
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = name.to_string_lossy().into_owned();
        let newname = newname.to_string_lossy().into_owned();
        debug!(parent, name = %name, newparent, newname = %newname, "rename");

        let Some(from_dir) = self.node_inode(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(to_dir) = self.node_inode(newparent) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.rename_in(&from_dir, &name, &to_dir, &newname) {
            Ok(()) => {
                // Re-point the moved node's binding at its new home.
                let moved = {
                    let node = to_dir.read();
                    node.dir_entries().ok().and_then(|entries| {
                        entries
                            .iter()
                            .find(|e| e.name == newname)
                            .map(|e| (e.inode.read().ino, Arc::clone(&e.inode)))
                    })
                };
                if let Some((moved_ino, inode)) = moved {
                    if let Some(handle) = self.nodes.get_mut(&moved_ino) {
                        handle.inode = inode;
                        handle.parent = Arc::clone(&to_dir);
                        handle.name = newname;
                    }
                }
                reply.ok();
            }
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let newname = newname.to_string_lossy().into_owned();
        debug!(ino, newparent, newname = %newname, "link");

        let Some(source) = self.node_inode(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(dir) = self.node_inode(newparent) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.link_in(&source, &dir, &newname) {
            Ok(()) => {
                let stat = source.read().stat();
                self.register(&dir, &newname, source);
                reply.entry(&TTL, &self.attr(&stat), 0);
            }
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino, flags, "open");

        let Some((parent, name)) = self
            .nodes
            .get(&ino)
            .map(|n| (Arc::clone(&n.parent), n.name.clone()))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        if name.is_empty() {
            // The root is not an openable file.
            reply.error(libc::EPERM);
            return;
        }
        let decoded = OpenFlags::from_bits(flags, self.fs.constants());
        match self.fs.open_in(&parent, &name, decoded, 0) {
            Ok(fd) => reply.opened(fd as u64, 0),
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = name.to_string_lossy().into_owned();
        debug!(parent, name = %name, mode, "create");

        let Some(parent_inode) = self.node_inode(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let constants = self.fs.constants();
        let decoded = OpenFlags::from_bits(constants.o_rdwr | constants.o_creat, constants);
        match self.fs.open_in(&parent_inode, &name, decoded, mode) {
            Ok(fd) => {
                let created = {
                    let node = parent_inode.read();
                    node.dir_entries().ok().and_then(|entries| {
                        entries
                            .iter()
                            .find(|e| e.name == name)
                            .map(|e| Arc::clone(&e.inode))
                    })
                };
                match created {
                    Some(inode) => {
                        let stat = inode.read().stat();
                        self.register(&parent_inode, &name, inode);
                        reply.created(&TTL, &self.attr(&stat), 0, fd as u64, 0);
                    }
                    None => reply.error(libc::EIO),
                }
            }
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino, fh, offset, size, "read");

        let mut buf = vec![0u8; size as usize];
        match self.fs.read_fd(fh as u32, &mut buf, Some(offset.max(0) as u64)) {
            Ok(read) => reply.data(&buf[..read]),
            Err(err) => reply.error(Self::errno(err.kind)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino, fh, offset, size = data.len(), "write");

        match self.fs.write_fd(fh as u32, data, Some(offset.max(0) as u64)) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(Self::errno(err.kind)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(ino, fh, "release");

        match self.fs.close(fh as u32) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(Self::errno(err.kind)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino, offset, "readdir");

        let Some((inode, parent)) = self
            .nodes
            .get(&ino)
            .map(|n| (Arc::clone(&n.inode), Arc::clone(&n.parent)))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let parent_ino = if Arc::ptr_eq(&inode, &parent) {
            ino
        } else {
            parent.read().ino
        };

        let mut listing: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        {
            let node = inode.read();
            let entries = match node.dir_entries() {
                Ok(entries) => entries,
                Err(kind) => {
                    reply.error(Self::errno(kind));
                    return;
                }
            };
            for entry in entries {
                let child = entry.inode.read();
                let kind = if child.is_dir() {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                };
                listing.push((child.ino, kind, entry.name.clone()));
            }
        }

        for (i, (ino, kind, name)) in listing.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(
            STATFS_PLACEHOLDER,
            STATFS_PLACEHOLDER,
            STATFS_PLACEHOLDER,
            STATFS_PLACEHOLDER,
            STATFS_PLACEHOLDER,
            STATFS_PLACEHOLDER as u32,
            STATFS_PLACEHOLDER as u32,
            STATFS_PLACEHOLDER as u32,
        );
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let name = name.to_string_lossy();
        debug!(ino, name = %name, "setxattr");

        match self.with_entry(ino, |entry| entry.set_xattr(&name, value)) {
            Ok(()) => reply.ok(),
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let name = name.to_string_lossy();
        debug!(ino, name = %name, "getxattr");

        match self.with_entry(ino, |entry| entry.xattr(&name).map(|v| v.to_vec())) {
            Ok(Some(value)) => Self::reply_xattr(&value, size, reply),
            Ok(None) => reply.error(NO_XATTR),
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        debug!(ino, "listxattr");

        match self.with_entry(ino, |entry| entry.xattr_names()) {
            Ok(names) => {
                let mut data = Vec::new();
                for name in names {
                    data.extend_from_slice(name.as_bytes());
                    data.push(0);
                }
                Self::reply_xattr(&data, size, reply);
            }
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        debug!(ino, name = %name, "removexattr");

        match self.with_entry(ino, |entry| entry.remove_xattr(&name)) {
            Ok(()) => reply.ok(),
            Err(kind) => reply.error(Self::errno(kind)),
        }
    }
}
