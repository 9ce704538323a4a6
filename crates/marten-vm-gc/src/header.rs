//! Heap cell header layout

/// Type tag for a heap cell.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellTag {
    /// Interned immutable string
    String = 1,
    /// Object (ordinary, array, function, proxy, thread, ...)
    Object = 2,
    /// Raw byte buffer
    Buffer = 3,
}

/// Cell flag bits.
pub mod flags {
    /// Baked-in read-only cell: refcount operations are no-ops and the cell
    /// is never freed.
    pub const READONLY: u16 = 1 << 0;
    /// Mark bit set during the mark phase of mark-and-sweep.
    pub const REACHABLE: u16 = 1 << 1;
    /// Cell is pinned as a GC root independent of the reference graph.
    pub const TEMPROOT: u16 = 1 << 2;
    /// Cell is on the mark-and-sweep finalize list.
    pub const FINALIZABLE: u16 = 1 << 3;
    /// Cell's finalizer has already run; it is not run again unless the
    /// finalizer is re-registered.
    pub const FINALIZED: u16 = 1 << 4;
    /// Cached "a finalizer is registered" bit, mirrored from the hidden
    /// finalizer property so the common no-finalizer case is a single test.
    pub const HAVE_FINALIZER: u16 = 1 << 5;
    /// Cell is on the refzero worklist.
    pub const QUEUED: u16 = 1 << 6;
}

/// Common header prefix of every heap cell.
///
/// Holds the type tag, flag bits, and the reference count. The count starts
/// at zero: a freshly allocated cell is not owned by anyone until the first
/// reference to it is stored somewhere counted.
#[derive(Debug)]
pub struct CellHeader {
    tag: CellTag,
    flags: u16,
    refcount: u32,
}

impl CellHeader {
    /// Create a new header with no flags and a zero refcount.
    pub const fn new(tag: CellTag) -> Self {
        Self {
            tag,
            flags: 0,
            refcount: 0,
        }
    }

    /// Get the cell type tag.
    #[inline]
    pub fn tag(&self) -> CellTag {
        self.tag
    }

    /// Get the current reference count.
    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Increment the reference count. No-op for read-only cells.
    #[inline]
    pub fn incref(&mut self) {
        if !self.has(flags::READONLY) {
            self.refcount += 1;
        }
    }

    /// Decrement the reference count, returning the new value. No-op for
    /// read-only cells (always reports nonzero so they are never queued).
    ///
    /// Panics in debug builds on refcount underflow; that always indicates a
    /// missing incref somewhere.
    #[inline]
    pub fn decref(&mut self) -> u32 {
        if self.has(flags::READONLY) {
            return u32::MAX;
        }
        debug_assert!(self.refcount > 0, "refcount underflow");
        self.refcount -= 1;
        self.refcount
    }

    /// Force the reference count to a specific value. Used only by the
    /// finalizer machinery (temporary bump to 1 while a finalizer runs).
    #[inline]
    pub fn set_refcount(&mut self, count: u32) {
        self.refcount = count;
    }

    /// Test a flag bit.
    #[inline]
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// Set a flag bit.
    #[inline]
    pub fn set(&mut self, flag: u16) {
        self.flags |= flag;
    }

    /// Clear a flag bit.
    #[inline]
    pub fn clear(&mut self, flag: u16) {
        self.flags &= !flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_flags() {
        let mut header = CellHeader::new(CellTag::Object);
        assert_eq!(header.tag(), CellTag::Object);
        assert!(!header.has(flags::REACHABLE));

        header.set(flags::REACHABLE);
        assert!(header.has(flags::REACHABLE));

        header.clear(flags::REACHABLE);
        assert!(!header.has(flags::REACHABLE));
    }

    #[test]
    fn test_refcount() {
        let mut header = CellHeader::new(CellTag::String);
        assert_eq!(header.refcount(), 0);

        header.incref();
        header.incref();
        assert_eq!(header.refcount(), 2);

        assert_eq!(header.decref(), 1);
        assert_eq!(header.decref(), 0);
    }

    #[test]
    fn test_readonly_skips_counting() {
        let mut header = CellHeader::new(CellTag::String);
        header.set(flags::READONLY);

        header.incref();
        assert_eq!(header.refcount(), 0);
        assert_ne!(header.decref(), 0);
    }
}
