//! `#[repr(C)]` structures persisted at the start of the region.
//!
//! All fields are fixed-size words so the layout is identical in every
//! process mapping the region. Word order is native; sharing between hosts
//! of different endianness or word size is unsupported.

use std::sync::atomic::AtomicU64;

/// Size of the fixed header at the start of the region.
pub const HEADER_SIZE: usize = 32;

/// Header lives at offset 0 of the region.
#[repr(C)]
pub struct Header {
    /// Segment identifier, doubling as the ready sentinel: zero while the
    /// initializer is still writing, the backing file's inode once the
    /// region is published. Stays zero for a private region.
    pub seg_id: AtomicU64,
    /// Usable heap capacity in bytes.
    pub size: u64,
    /// Next-fit cursor, as a byte offset into the heap area. Always the
    /// head of some block.
    pub cursor: u64,
    /// Caller-reserved bytes between header and heap area.
    pub headroom: u64,
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

/// Offset of the heap area from the start of the region.
pub fn heap_offset(headroom: usize) -> usize {
    HEADER_SIZE + headroom
}

/// Total byte budget of a region, rounded up to the page size.
pub fn region_size(capacity: usize, headroom: usize, page: usize) -> usize {
    (HEADER_SIZE + headroom + capacity + page - 1) & !(page - 1)
}
