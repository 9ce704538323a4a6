//! # Marten VM heap cell layout
//!
//! Shared data layout for the Marten heap: the per-cell header (type tag,
//! flag bits, reference count), typed arena handles, and the sanity-limit
//! constants that bound chain-walk algorithms.
//!
//! ## Design
//!
//! - **Refcount-first**: every cell carries a 32-bit reference count;
//!   mark-and-sweep is the backstop for reference cycles only.
//! - **Handles, not pointers**: cells are addressed by arena indices, so
//!   list insertion/removal is O(1) without raw aliasing pointers.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod handle;
pub mod header;

pub use handle::{BufferId, HeapId, ObjectId, StringId};
pub use header::{CellHeader, CellTag, flags};

/// Iteration budget for prototype-chain walks. A chain longer than this is
/// treated as pathological (cyclic or corrupted) and reported as a range
/// error rather than walked forever.
pub const PROTOTYPE_CHAIN_SANITY_LIMIT: u32 = 10_000;

/// Iteration budget for bound-function target chains.
pub const BOUND_CHAIN_SANITY_LIMIT: u32 = 10_000;
