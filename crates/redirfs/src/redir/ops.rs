//! TEAM_470: Operation identifiers and operation sets
//!
//! A filter is told which operation triggered it through an `OpId`. The id
//! encodes the inode kind as well as the operation, so `permission` on a
//! directory and on a regular file are distinct ids.

use crate::vfs::FileKind;

/// TEAM_470: Every operation the layer can intercept
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum OpId {
    RegPermission,
    RegSetattr,
    RegReadpage,
    RegWritepage,
    DirLookup,
    DirCreate,
    DirMkdir,
    DirMknod,
    DirSymlink,
    DirLink,
    DirUnlink,
    DirRmdir,
    DirPermission,
    DirSetattr,
    LnkPermission,
    LnkSetattr,
    ChrPermission,
    ChrSetattr,
    BlkPermission,
    BlkSetattr,
    FifoPermission,
    FifoSetattr,
    SockPermission,
    SockSetattr,
    DentryRevalidate,
}

impl OpId {
    pub const COUNT: usize = OpId::DentryRevalidate as usize + 1;

    /// TEAM_470: Permission check id for an inode of `kind`
    pub const fn permission(kind: FileKind) -> Self {
        match kind {
            FileKind::Regular => OpId::RegPermission,
            FileKind::Directory => OpId::DirPermission,
            FileKind::Symlink => OpId::LnkPermission,
            FileKind::CharDevice => OpId::ChrPermission,
            FileKind::BlockDevice => OpId::BlkPermission,
            FileKind::Fifo => OpId::FifoPermission,
            FileKind::Socket => OpId::SockPermission,
        }
    }

    /// TEAM_470: Attribute change id for an inode of `kind`
    pub const fn setattr(kind: FileKind) -> Self {
        match kind {
            FileKind::Regular => OpId::RegSetattr,
            FileKind::Directory => OpId::DirSetattr,
            FileKind::Symlink => OpId::LnkSetattr,
            FileKind::CharDevice => OpId::ChrSetattr,
            FileKind::BlockDevice => OpId::BlkSetattr,
            FileKind::Fifo => OpId::FifoSetattr,
            FileKind::Socket => OpId::SockSetattr,
        }
    }

    const fn bit(self) -> u64 {
        1 << (self as u8)
    }
}

/// TEAM_470: Set of operations a chain wants intercepted
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct OperationSet(u64);

impl OperationSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_ops(ops: &[OpId]) -> Self {
        ops.iter().fold(Self::empty(), |set, &op| set.with(op))
    }

    #[must_use]
    pub const fn with(self, op: OpId) -> Self {
        Self(self.0 | op.bit())
    }

    pub fn insert(&mut self, op: OpId) {
        self.0 |= op.bit();
    }

    pub const fn contains(&self, op: OpId) -> bool {
        self.0 & op.bit() != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl core::fmt::Debug for OperationSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "OperationSet({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_fit_the_bitmap() {
        assert!(OpId::COUNT <= 64);
    }

    #[test]
    fn test_set_membership() {
        let set = OperationSet::from_ops(&[OpId::DirCreate, OpId::DirLookup]);
        assert!(set.contains(OpId::DirCreate));
        assert!(set.contains(OpId::DirLookup));
        assert!(!set.contains(OpId::DirMkdir));
        assert!(OperationSet::empty().is_empty());

        let mut grown = set;
        grown.insert(OpId::RegReadpage);
        assert_eq!(grown, set.union(OperationSet::from_ops(&[OpId::RegReadpage])));
    }

    #[test]
    fn test_kind_specific_ids() {
        assert_eq!(OpId::permission(FileKind::Fifo), OpId::FifoPermission);
        assert_eq!(OpId::setattr(FileKind::Directory), OpId::DirSetattr);
    }
}
