//! Fixed-bucket separate-chaining hash table of intrusive list nodes.
//!
//! The table lives in region memory: a bucket count followed by a flexible
//! array of list-head offsets, one chain per bucket. The table stores no
//! keys and never rehashes; hashing and equality are entirely the
//! caller's, and the bucket count is immutable after init. Collisions are
//! tolerated without growth.

use crate::list::{self, ListNode};
use crate::offset::Off;

/// Table header; the bucket array of list-head offsets follows
/// immediately after it in region memory.
#[repr(C)]
#[derive(Debug)]
pub struct HTable {
    buckets: u64,
}

impl HTable {
    /// Bytes of region memory a table with `buckets` chains occupies.
    pub const fn bytes_for(buckets: usize) -> usize {
        std::mem::size_of::<HTable>() + buckets * std::mem::size_of::<Off>()
    }

    pub fn buckets(&self) -> usize {
        self.buckets as usize
    }
}

const _: () = assert!(std::mem::size_of::<HTable>() == 8);

unsafe fn bucket(ht: *mut HTable, i: usize) -> *mut Off {
    ht.add(1).cast::<Off>().add(i)
}

/// Initialize a table in caller-provided region memory, emptying every
/// bucket.
///
/// # Safety
/// `ht` must point to at least `HTable::bytes_for(buckets)` bytes inside
/// the region, exclusively owned by the caller.
pub unsafe fn init(ht: *mut HTable, buckets: usize) {
    (*ht).buckets = buckets as u64;
    for i in 0..buckets {
        *bucket(ht, i) = Off::NULL;
    }
}

/// Prepend `e` to the chain for `hash`. O(1). Any hash is accepted; it is
/// reduced modulo the bucket count.
///
/// # Safety
/// `base` must be the region's base address, `ht` an initialized table
/// and `e` a valid node in that region; `e` must not currently be linked
/// into any chain.
pub unsafe fn add(base: *mut u8, ht: *mut HTable, hash: u64, e: *mut ListNode) {
    debug_assert!(!ht.is_null() && (*ht).buckets != 0 && !e.is_null());
    debug_assert!((*e).next.is_null(), "node is already in a chain");
    let i = (hash % (*ht).buckets) as usize;
    *bucket(ht, i) = list::prepend(base, *bucket(ht, i), e);
}

/// Splice `e` out of the chain for `hash`. The hash must be the one used
/// at insert; entries are never rehashed.
///
/// # Safety
/// Same requirements as [`add`], with `e` a member of that chain (or
/// unlinked, in which case this is a no-op on an empty chain).
pub unsafe fn delete(base: *mut u8, ht: *mut HTable, hash: u64, e: *mut ListNode) {
    debug_assert!(!ht.is_null() && (*ht).buckets != 0 && !e.is_null());
    let i = (hash % (*ht).buckets) as usize;
    *bucket(ht, i) = list::remove(base, *bucket(ht, i), e);
}

/// Total entries across all buckets. O(n); diagnostic.
///
/// # Safety
/// `base` must be the region's base address and `ht` an initialized table.
pub unsafe fn size(base: *mut u8, ht: *mut HTable) -> usize {
    (0..(*ht).buckets as usize)
        .map(|i| list::length(base, *bucket(ht, i)))
        .sum()
}

/// Entry at position `*cursor` within the chain for `hash`, advancing the
/// cursor; null past the end. Repeated calls iterate one bucket.
///
/// # Safety
/// Same requirements as [`size`].
pub unsafe fn get(
    base: *mut u8,
    ht: *mut HTable,
    hash: u64,
    cursor: &mut usize,
) -> *mut ListNode {
    let i = (hash % (*ht).buckets) as usize;
    let e = list::get(base, *bucket(ht, i), *cursor);
    *cursor += 1;
    e
}

/// First entry in the chain for `hash` satisfying `pred`, or null.
///
/// # Safety
/// Same requirements as [`size`].
pub unsafe fn find<F>(base: *mut u8, ht: *mut HTable, hash: u64, pred: F) -> *mut ListNode
where
    F: FnMut(*mut ListNode) -> bool,
{
    let i = (hash % (*ht).buckets) as usize;
    list::find(base, *bucket(ht, i), pred)
}

/// Print a histogram of bucket occupancy to stdout.
///
/// # Safety
/// Same requirements as [`size`].
pub unsafe fn stats(base: *mut u8, ht: *mut HTable) {
    let buckets = (*ht).buckets as usize;
    let mut histogram = vec![0usize; buckets];
    let mut max_bucket = 0;
    let mut min_bucket = buckets;

    for (i, count) in histogram.iter_mut().enumerate() {
        *count = list::length(base, *bucket(ht, i));
        if *count > 0 {
            max_bucket = max_bucket.max(i);
            min_bucket = min_bucket.min(i);
        }
    }

    let max = histogram.iter().copied().max().unwrap_or(0);
    let scale = if max > 50 { max / 50 } else { 1 };

    println!();
    for i in min_bucket..=max_bucket.min(buckets.saturating_sub(1)) {
        print!("{i:>10} ");
        for _ in 0..histogram[i] / scale {
            print!("x");
        }
        if histogram[i] > 0 {
            print!(" ({})", histogram[i]);
        }
        println!();
    }
}

/// djb2 string hash: h = 5381, then h = h * 33 + byte for every byte.
pub fn strhash(s: &str) -> u64 {
    s.bytes()
        .fold(5381u64, |h, c| h.wrapping_mul(33).wrapping_add(u64::from(c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strhash_is_djb2() {
        assert_eq!(strhash(""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(strhash("a"), 5381 * 33 + 97);
        assert_ne!(strhash("abc"), strhash("acb"));
    }

    #[test]
    fn table_footprint() {
        assert_eq!(HTable::bytes_for(0), 8);
        assert_eq!(HTable::bytes_for(32), 8 + 32 * 8);
    }
}
