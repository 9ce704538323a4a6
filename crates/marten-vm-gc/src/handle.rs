//! Typed arena handles
//!
//! Heap cells are addressed by 32-bit arena slot indices. The untyped
//! [`HeapId`] addresses any cell; the typed wrappers ([`StringId`],
//! [`ObjectId`], [`BufferId`]) carry the cell kind in the type system so the
//! accessors on the heap cannot be handed the wrong kind of cell.

/// Untyped handle to a heap cell (arena slot index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(pub u32);

impl HeapId {
    /// Slot index as usize.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

macro_rules! typed_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub HeapId);

        impl $name {
            /// The underlying untyped handle.
            #[inline]
            pub fn heap_id(self) -> HeapId {
                self.0
            }

            /// Slot index as usize.
            #[inline]
            pub fn index(self) -> usize {
                self.0.index()
            }
        }

        impl From<$name> for HeapId {
            fn from(id: $name) -> HeapId {
                id.0
            }
        }
    };
}

typed_handle!(
    /// Handle to an interned string cell.
    StringId
);
typed_handle!(
    /// Handle to an object cell.
    ObjectId
);
typed_handle!(
    /// Handle to a buffer cell.
    BufferId
);
