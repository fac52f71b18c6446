//! Inodes, directory entries, and sparse file bodies.
//!
//! An inode is the identity of a filesystem object; a directory entry is
//! a (name, inode) binding inside a parent directory. Several entries may
//! share one inode, which is what a hard link is. Entries also carry the
//! extended-attribute map, so hard-linked names keep independent xattr
//! sets.

use std::sync::Arc;

use parking_lot::RwLock;
use vapor_core::{ConstantSet, ErrorKind, Timestamp, BLOCK_SIZE, DIR_SIZE, STAT_BLOCK_SIZE};

/// Shared handle to an inode.
///
/// Held by every directory entry that links to the inode and by every
/// open descriptor bound to it. The inode is freed when the last holder
/// drops, which is exactly the unlink-then-keep-reading rule: data stays
/// readable through an open descriptor after the last link is removed.
pub type InodeRef = Arc<RwLock<Inode>>;

/// Metadata and storage for one filesystem object.
#[derive(Debug)]
pub struct Inode {
    /// Unique inode number; never reused within a filesystem lifetime.
    pub ino: u64,
    /// Type bits plus permission bits.
    pub mode: u32,
    /// Owning user id (recorded, never enforced).
    pub uid: u32,
    /// Owning group id (recorded, never enforced).
    pub gid: u32,
    /// Number of directory entries linking to this inode.
    pub nlink: u32,
    /// Last access time.
    pub atime: Timestamp,
    /// Last modification time.
    pub mtime: Timestamp,
    /// Last status change time.
    pub ctime: Timestamp,
    /// Directory child list or file block vector.
    pub body: InodeBody,
}

/// The storage side of an inode. Exactly one variant per inode, matching
/// the single type bit in `mode`.
#[derive(Debug)]
pub enum InodeBody {
    /// Child entries in insertion order.
    Directory(Vec<DirEntry>),
    /// Sparse block vector plus logical size.
    File(FileBody),
}

/// A (name, inode) binding inside a parent directory's child list.
#[derive(Debug)]
pub struct DirEntry {
    /// Name, unique within the parent. Never empty.
    pub name: String,
    /// The shared object this name binds.
    pub inode: InodeRef,
    /// Extended attributes, insertion-ordered. Per-entry: hard-linked
    /// names do not share these.
    pub xattrs: Vec<(String, Vec<u8>)>,
}

impl DirEntry {
    /// Creates a binding with an empty attribute set.
    pub fn new(name: impl Into<String>, inode: InodeRef) -> Self {
        Self {
            name: name.into(),
            inode,
            xattrs: Vec::new(),
        }
    }

    /// Returns the attribute value, if present.
    pub fn xattr(&self, name: &str) -> Option<&[u8]> {
        self.xattrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Sets or overwrites an attribute.
    pub fn set_xattr(&mut self, name: &str, value: &[u8]) {
        match self.xattrs.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_vec(),
            None => self.xattrs.push((name.to_string(), value.to_vec())),
        }
    }

    /// Removes an attribute. Silent when absent.
    pub fn remove_xattr(&mut self, name: &str) {
        self.xattrs.retain(|(n, _)| n != name);
    }

    /// Attribute names in insertion order.
    pub fn xattr_names(&self) -> Vec<String> {
        self.xattrs.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Sparse, block-addressed file storage.
///
/// Blocks are allocated on first write. A `None` slot, or an index past
/// the end of the vector, reads as zeros. The logical size is tracked
/// separately and bounds every read; `size` may exceed the allocated
/// blocks (after a growing truncate) or fall short of them (after a
/// shrinking one).
#[derive(Debug, Default)]
pub struct FileBody {
    blocks: Vec<Option<Vec<u8>>>,
    size: u64,
}

impl FileBody {
    /// Creates an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of block slots currently held, allocated or not.
    pub fn block_slots(&self) -> usize {
        self.blocks.len()
    }

    /// Copies bytes `[offset, min(offset + buf.len, size))` into `buf`,
    /// reading unallocated blocks as zeros. Returns the byte count, which
    /// is 0 at or past end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let len = ((self.size - offset) as usize).min(buf.len());
        let block_size = BLOCK_SIZE as u64;
        let mut copied = 0;
        while copied < len {
            let pos = offset + copied as u64;
            let index = (pos / block_size) as usize;
            let start = (pos % block_size) as usize;
            let n = (BLOCK_SIZE - start).min(len - copied);
            match self.blocks.get(index).and_then(|b| b.as_ref()) {
                Some(block) => buf[copied..copied + n].copy_from_slice(&block[start..start + n]),
                None => buf[copied..copied + n].fill(0),
            }
            copied += n;
        }
        len
    }

    /// Copies `data` in at `offset`, growing the logical size first and
    /// allocating zero-filled blocks as needed. Returns `data.len()`.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> usize {
        let end = offset + data.len() as u64;
        if end > self.size {
            self.size = end;
        }
        let block_size = BLOCK_SIZE as u64;
        let mut written = 0;
        while written < data.len() {
            let pos = offset + written as u64;
            let index = (pos / block_size) as usize;
            let start = (pos % block_size) as usize;
            if self.blocks.len() <= index {
                self.blocks.resize_with(index + 1, || None);
            }
            let block = self.blocks[index].get_or_insert_with(|| vec![0u8; BLOCK_SIZE]);
            let n = (BLOCK_SIZE - start).min(data.len() - written);
            block[start..start + n].copy_from_slice(&data[written..written + n]);
            written += n;
        }
        written
    }

    /// Sets the logical size, dropping blocks wholly past the new tail.
    /// Bytes inside a kept block past the tail are not zeroed; reads are
    /// bounded by `size`, so they are unobservable. Growing allocates
    /// nothing.
    pub fn truncate(&mut self, size: u64) {
        self.size = size;
        let block_size = BLOCK_SIZE as u64;
        let keep = ((size + block_size - 1) / block_size) as usize;
        if self.blocks.len() > keep {
            self.blocks.truncate(keep);
        }
    }

    /// Drops all blocks and resets the size to zero.
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.size = 0;
    }
}

impl Inode {
    /// Creates a directory inode.
    pub fn directory(ino: u64, constants: &ConstantSet) -> Self {
        let now = Timestamp::now();
        Self {
            ino,
            mode: constants.s_ifdir | 0o777,
            uid: 0,
            gid: 0,
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
            body: InodeBody::Directory(Vec::new()),
        }
    }

    /// Creates a regular-file inode.
    pub fn file(ino: u64, constants: &ConstantSet) -> Self {
        let now = Timestamp::now();
        Self {
            ino,
            mode: constants.s_ifreg | 0o666,
            uid: 0,
            gid: 0,
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
            body: InodeBody::File(FileBody::new()),
        }
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        matches!(self.body, InodeBody::Directory(_))
    }

    /// Returns true for regular files.
    pub fn is_file(&self) -> bool {
        matches!(self.body, InodeBody::File(_))
    }

    /// Child entries, or ENOTDIR.
    pub fn dir_entries(&self) -> Result<&Vec<DirEntry>, ErrorKind> {
        match &self.body {
            InodeBody::Directory(entries) => Ok(entries),
            InodeBody::File(_) => Err(ErrorKind::NotDir),
        }
    }

    /// Mutable child entries, or ENOTDIR.
    pub fn dir_entries_mut(&mut self) -> Result<&mut Vec<DirEntry>, ErrorKind> {
        match &mut self.body {
            InodeBody::Directory(entries) => Ok(entries),
            InodeBody::File(_) => Err(ErrorKind::NotDir),
        }
    }

    /// File storage, or EISDIR.
    pub fn file_body(&self) -> Result<&FileBody, ErrorKind> {
        match &self.body {
            InodeBody::File(body) => Ok(body),
            InodeBody::Directory(_) => Err(ErrorKind::IsDir),
        }
    }

    /// Mutable file storage, or EISDIR.
    pub fn file_body_mut(&mut self) -> Result<&mut FileBody, ErrorKind> {
        match &mut self.body {
            InodeBody::File(body) => Ok(body),
            InodeBody::Directory(_) => Err(ErrorKind::IsDir),
        }
    }

    /// Moves mtime and ctime to now.
    pub fn touch(&mut self) {
        let now = Timestamp::now();
        self.mtime = now;
        self.ctime = now;
    }

    /// Replaces the permission bits, preserving the type bit.
    pub fn set_mode(&mut self, mode: u32, constants: &ConstantSet) {
        let file_type = self.mode & constants.s_ifmt;
        self.mode = file_type | (mode & !constants.s_ifmt);
    }

    /// Overwrites ownership.
    pub fn set_owner(&mut self, uid: u32, gid: u32) {
        self.uid = uid;
        self.gid = gid;
    }

    /// Overwrites access and modification times.
    pub fn set_times(&mut self, atime: Timestamp, mtime: Timestamp) {
        self.atime = atime;
        self.mtime = mtime;
    }

    /// Builds a stat record. Directories report a fixed size of 512.
    pub fn stat(&self) -> Stat {
        let size = match &self.body {
            InodeBody::Directory(_) => DIR_SIZE,
            InodeBody::File(body) => body.size(),
        };
        Stat {
            dev: 0,
            ino: self.ino,
            mode: self.mode,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            size,
            blocks: (size + STAT_BLOCK_SIZE - 1) / STAT_BLOCK_SIZE,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}

/// A stat record as surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Device id, always 0.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// Type bits plus permission bits.
    pub mode: u32,
    /// Hard link count.
    pub nlink: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Special-device id, always 0.
    pub rdev: u64,
    /// Logical size in bytes.
    pub size: u64,
    /// Size in 512-byte units, rounded up.
    pub blocks: u64,
    /// Last access time.
    pub atime: Timestamp,
    /// Last modification time.
    pub mtime: Timestamp,
    /// Last status change time.
    pub ctime: Timestamp,
}
