//! Open file descriptors and the descriptor table.

#[cfg(test)]
use std::sync::Arc;

use vapor_core::{ConstantSet, ErrorKind, FD_BASE};

use crate::inode::InodeRef;

/// Open flags decoded into the five facts the filesystem acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Access mode includes reading.
    pub readable: bool,
    /// Access mode includes writing.
    pub writable: bool,
    /// O_APPEND: position starts at end of file.
    pub appending: bool,
    /// O_EXCL: fail if the entry exists.
    pub exclusive: bool,
    /// O_CREAT: create the entry if absent.
    pub creating: bool,
}

impl OpenFlags {
    /// Decodes a numeric flag word using the given constant set.
    pub fn from_bits(flags: i32, constants: &ConstantSet) -> Self {
        let access = flags & constants.o_accmode;
        Self {
            readable: access == constants.o_rdonly || access == constants.o_rdwr,
            writable: access == constants.o_wronly || access == constants.o_rdwr,
            appending: flags & constants.o_append != 0,
            exclusive: flags & constants.o_excl != 0,
            creating: flags & constants.o_creat != 0,
        }
    }

    /// Decodes a textual flag form such as `"r+"` or `"a"`.
    pub fn from_str(flags: &str, constants: &ConstantSet) -> Option<Self> {
        constants
            .parse_flags(flags)
            .map(|word| Self::from_bits(word, constants))
    }
}

/// An open handle: a bound inode, a position, and the decoded flags.
#[derive(Debug)]
pub struct FileDescriptor {
    id: u32,
    /// The bound file. Holding this keeps the inode alive even after the
    /// last link to it is unlinked.
    pub inode: InodeRef,
    /// Current byte position.
    pub position: u64,
    /// Flags decoded at open time.
    pub flags: OpenFlags,
}

impl FileDescriptor {
    /// The descriptor id, stable for the descriptor's lifetime.
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Slot table for open descriptors.
///
/// Ids start at [`FD_BASE`] and index the table directly (`id - FD_BASE`).
/// Allocation always appends; releasing a descriptor nulls its slot and
/// trims trailing nulls so id growth stays bounded under open/close churn.
/// Interior holes are never reused.
#[derive(Debug, Default)]
pub struct FdTable {
    slots: Vec<Option<FileDescriptor>>,
}

impl FdTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a descriptor on `inode` and returns its id.
    pub fn allocate(&mut self, inode: InodeRef, position: u64, flags: OpenFlags) -> u32 {
        let id = self.slots.len() as u32 + FD_BASE;
        self.slots.push(Some(FileDescriptor {
            id,
            inode,
            position,
            flags,
        }));
        id
    }

    fn index(id: u32) -> Option<usize> {
        id.checked_sub(FD_BASE).map(|offset| offset as usize)
    }

    /// Looks up an open descriptor.
    pub fn get(&self, id: u32) -> Option<&FileDescriptor> {
        Self::index(id).and_then(|i| self.slots.get(i)).and_then(Option::as_ref)
    }

    /// Looks up an open descriptor for mutation.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut FileDescriptor> {
        Self::index(id)
            .and_then(|i| self.slots.get_mut(i))
            .and_then(Option::as_mut)
    }

    /// Closes a descriptor. EBADF when the slot is null or out of range.
    pub fn release(&mut self, id: u32) -> Result<FileDescriptor, ErrorKind> {
        let index = Self::index(id).ok_or(ErrorKind::BadF)?;
        let slot = self.slots.get_mut(index).ok_or(ErrorKind::BadF)?;
        let descriptor = slot.take().ok_or(ErrorKind::BadF)?;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Ok(descriptor)
    }

    /// Number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Number of slots held, including interior nulls.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use vapor_core::constants::LINUX;

    use crate::inode::Inode;

    fn file_ref(ino: u64) -> InodeRef {
        Arc::new(RwLock::new(Inode::file(ino, &LINUX)))
    }

    fn rdwr() -> OpenFlags {
        OpenFlags::from_bits(LINUX.o_rdwr, &LINUX)
    }

    #[test]
    fn test_decode_access_modes() {
        let read_only = OpenFlags::from_bits(LINUX.o_rdonly, &LINUX);
        assert!(read_only.readable && !read_only.writable);

        let write_only = OpenFlags::from_bits(LINUX.o_wronly, &LINUX);
        assert!(!write_only.readable && write_only.writable);

        let both = OpenFlags::from_bits(LINUX.o_rdwr, &LINUX);
        assert!(both.readable && both.writable);
    }

    #[test]
    fn test_decode_modifier_bits() {
        let word = LINUX.o_wronly | LINUX.o_append | LINUX.o_creat | LINUX.o_excl;
        let flags = OpenFlags::from_bits(word, &LINUX);
        assert!(flags.appending && flags.creating && flags.exclusive);
    }

    #[test]
    fn test_decode_textual_form() {
        let flags = OpenFlags::from_str("a+", &LINUX).unwrap();
        assert!(flags.readable && flags.writable && flags.appending && flags.creating);
        assert!(OpenFlags::from_str("q", &LINUX).is_none());
    }

    #[test]
    fn test_ids_start_at_base_and_append() {
        let mut table = FdTable::new();
        assert_eq!(table.allocate(file_ref(2), 0, rdwr()), 20);
        assert_eq!(table.allocate(file_ref(3), 0, rdwr()), 21);
        assert_eq!(table.allocate(file_ref(4), 0, rdwr()), 22);
    }

    #[test]
    fn test_release_trims_trailing_nulls() {
        let mut table = FdTable::new();
        let a = table.allocate(file_ref(2), 0, rdwr());
        let b = table.allocate(file_ref(3), 0, rdwr());
        table.release(b).unwrap();
        assert_eq!(table.slot_count(), 1);
        table.release(a).unwrap();
        assert_eq!(table.slot_count(), 0);

        // Freed id space is handed out again once the tail is trimmed.
        assert_eq!(table.allocate(file_ref(4), 0, rdwr()), 20);
    }

    #[test]
    fn test_interior_hole_is_not_reused() {
        let mut table = FdTable::new();
        let a = table.allocate(file_ref(2), 0, rdwr());
        let _b = table.allocate(file_ref(3), 0, rdwr());
        table.release(a).unwrap();
        assert_eq!(table.slot_count(), 2);
        assert_eq!(table.allocate(file_ref(4), 0, rdwr()), 22);
    }

    #[test]
    fn test_release_rejects_bad_ids() {
        let mut table = FdTable::new();
        assert_eq!(table.release(20).unwrap_err(), ErrorKind::BadF);
        assert_eq!(table.release(5).unwrap_err(), ErrorKind::BadF);

        let a = table.allocate(file_ref(2), 0, rdwr());
        table.release(a).unwrap();
        assert_eq!(table.release(a).unwrap_err(), ErrorKind::BadF);
    }

    #[test]
    fn test_id_resolves_to_same_inode_across_churn() {
        let mut table = FdTable::new();
        let target = file_ref(7);
        let held = table.allocate(Arc::clone(&target), 0, rdwr());

        let other = table.allocate(file_ref(8), 0, rdwr());
        table.release(other).unwrap();
        let _again = table.allocate(file_ref(9), 0, rdwr());

        let descriptor = table.get(held).unwrap();
        assert!(Arc::ptr_eq(&descriptor.inode, &target));
        assert_eq!(descriptor.id(), held);
    }
}
