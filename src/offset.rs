//! Offset / pointer translation.
//!
//! The same region may be mapped at different addresses in different
//! processes, so nothing inside it may store an address. Links are byte
//! offsets from the region base, carried in the [`Off`] newtype so they
//! cannot be confused with native pointers. Offset zero is the null
//! sentinel; the header occupies offset 0, so no heap allocation can ever
//! legitimately be at offset zero.
//!
//! [`to_ptr`] and [`to_off`] are the only two translation paths in the
//! crate. Raw addresses exist only transiently on the stack within a call.

use std::ptr;

/// A byte offset from a region's base address. Zero is null.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(transparent)]
pub struct Off(u64);

impl Off {
    /// The null offset.
    pub const NULL: Off = Off(0);

    pub const fn new(raw: u64) -> Self {
        Off(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Translate an offset into an address within the mapping at `base`.
///
/// The null offset translates to the null pointer.
pub fn to_ptr(base: *mut u8, off: Off) -> *mut u8 {
    if off.is_null() {
        ptr::null_mut()
    } else {
        base.wrapping_add(off.0 as usize)
    }
}

/// Translate an address within the mapping at `base` back into an offset.
///
/// The null pointer translates to the null offset.
pub fn to_off(base: *mut u8, p: *const u8) -> Off {
    if p.is_null() {
        Off::NULL
    } else {
        Off((p as u64).wrapping_sub(base as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut backing = [0u8; 64];
        let base = backing.as_mut_ptr();

        for off in [8u64, 24, 63] {
            let p = to_ptr(base, Off::new(off));
            assert_eq!(to_off(base, p), Off::new(off));
        }
        assert_eq!(to_ptr(base, Off::NULL), ptr::null_mut());
        assert_eq!(to_off(base, ptr::null()), Off::NULL);
    }

    #[test]
    fn null_is_zero() {
        assert!(Off::NULL.is_null());
        assert!(Off::default().is_null());
        assert!(!Off::new(1).is_null());
    }
}
