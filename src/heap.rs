//! Boundary-tag heap over the region's heap area.
//!
//! Every block carries one metadata word at its first bytes (head) and an
//! identical word at its last bytes (foot): the block size in the upper
//! bits, the used flag in bit 0. The foot lets a block reach its
//! predecessor in a single read, which makes coalescing O(1). Placement is
//! next-fit from a rotating cursor stored in the region header.

use crate::offset::{to_off, to_ptr, Off};
use crate::region::Region;

/// Bytes of one metadata word.
const META: usize = std::mem::size_of::<u64>();

/// All block sizes are multiples of this, which keeps the low mark bit
/// free for the used flag.
pub(crate) const ALIGNMENT: usize = 8;

/// Two metadata words plus one alignment unit of payload.
pub(crate) const MIN_BLOCK: usize = 2 * META + 8;

const USED: u64 = 1;

const fn align_up(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

unsafe fn mark(bp: *const u8) -> u64 {
    (bp as *const u64).read()
}

unsafe fn blk_size(bp: *const u8) -> usize {
    (mark(bp) & !USED) as usize
}

unsafe fn blk_used(bp: *const u8) -> bool {
    mark(bp) & USED != 0
}

/// Write head and foot of the block at `bp` in one go. Head and foot must
/// carry identical bit patterns for the block's entire lifetime.
unsafe fn blk_set(bp: *mut u8, size: usize, used: bool) {
    let m = size as u64 | used as u64;
    (bp as *mut u64).write(m);
    (bp.add(size - META) as *mut u64).write(m);
}

unsafe fn blk_next(bp: *mut u8) -> *mut u8 {
    bp.add(blk_size(bp))
}

/// Valid only when `bp` is not the first block in the heap area.
unsafe fn blk_prev(bp: *mut u8) -> *mut u8 {
    bp.sub((((bp.sub(META)) as *const u64).read() & !USED) as usize)
}

/// Install the single spanning free block of a freshly initialized heap
/// area.
pub(crate) unsafe fn format(heap: *mut u8, capacity: usize) {
    blk_set(heap, capacity, false);
}

impl Region {
    /// Allocate `size` bytes from the heap area and return the payload
    /// offset, which is never zero for a successful allocation.
    ///
    /// Returns `None`, leaving the heap unchanged, when `size` is zero or
    /// when no free block is large enough. Exhaustion is not retried.
    pub fn alloc(&mut self, size: usize) -> Option<Off> {
        if size == 0 {
            return None;
        }
        let want = align_up(size + 2 * META).max(MIN_BLOCK);

        unsafe {
            let heap = self.heap_base();
            let bp = self.find_fit(want)?;
            self.header_mut().cursor = bp.offset_from(heap) as u64;

            // Split only when the remainder can stand alone as a block;
            // otherwise the whole block is consumed so that the heap stays
            // an exact partition of the capacity.
            let have = blk_size(bp);
            if have - want > MIN_BLOCK {
                blk_set(bp.add(want), have - want, false);
                blk_set(bp, want, true);
            } else {
                blk_set(bp, have, true);
            }

            Some(to_off(self.base_ptr(), bp.add(META)))
        }
    }

    /// Return a payload to the heap. The null offset is a no-op.
    ///
    /// The block is merged with free neighbors on both sides, so no two
    /// adjacent free blocks survive a free, and the cursor is pulled back
    /// to the merged head whenever its block is swallowed.
    pub fn free(&mut self, m: Off) {
        if m.is_null() {
            return;
        }
        unsafe {
            let bp = to_ptr(self.base_ptr(), m).sub(META);
            blk_set(bp, blk_size(bp), false);
            self.coalesce(bp);
        }
    }

    unsafe fn coalesce(&mut self, mut bp: *mut u8) {
        let heap = self.heap_base();
        let end = heap as usize + self.capacity();

        if heap < bp {
            let prev = blk_prev(bp);
            if !blk_used(prev) {
                blk_set(prev, blk_size(prev) + blk_size(bp), false);
                let header = self.header_mut();
                if header.cursor == bp.offset_from(heap) as u64 {
                    header.cursor = prev.offset_from(heap) as u64;
                }
                bp = prev;
            }
        }

        let next = blk_next(bp);
        if (next as usize) < end && !blk_used(next) {
            let header = self.header_mut();
            if header.cursor == next.offset_from(heap) as u64 {
                header.cursor = bp.offset_from(heap) as u64;
            }
            blk_set(bp, blk_size(bp) + blk_size(next), false);
        }
    }

    /// Next-fit search: scan from the cursor, wrapping once around the
    /// heap area, with a visited-byte counter against the capacity to
    /// guarantee termination.
    unsafe fn find_fit(&self, want: usize) -> Option<*mut u8> {
        let heap = self.heap_base();
        let end = heap as usize + self.capacity();
        let mut checked = 0;
        let mut bp = heap.add(self.header().cursor as usize);

        loop {
            if checked >= self.capacity() {
                return None;
            }
            if bp as usize >= end {
                bp = heap;
            }
            if !blk_used(bp) && blk_size(bp) >= want {
                return Some(bp);
            }
            checked += blk_size(bp);
            bp = blk_next(bp);
        }
    }

    /// Free bytes left in the heap, by linear walk. Diagnostic cost; not
    /// meant for the allocation hot path.
    pub fn available(&self) -> usize {
        let mut free = 0;
        unsafe {
            let heap = self.heap_base();
            let end = heap as usize + self.capacity();
            let mut bp = heap;
            while (bp as usize) < end {
                if !blk_used(bp) {
                    free += blk_size(bp);
                }
                bp = blk_next(bp);
            }
        }
        free
    }

    /// Print a histogram of used block sizes to stdout.
    pub fn stats(&self) {
        const BUCKETS: usize = 28;

        let mut histogram = [0usize; BUCKETS];
        let mut full = 0;
        let mut empty = 0;
        let mut used = 0;
        let mut free = 0;
        let mut max_bucket = 0;
        let mut min_bucket = BUCKETS;

        unsafe {
            let heap = self.heap_base();
            let end = heap as usize + self.capacity();
            let mut bp = heap;
            while (bp as usize) < end {
                let size = blk_size(bp);
                if !blk_used(bp) {
                    free += size;
                    empty += 1;
                } else {
                    let bucket =
                        (size.next_power_of_two().trailing_zeros() as usize).min(BUCKETS - 1);
                    histogram[bucket] += 1;
                    used += size;
                    full += 1;
                    max_bucket = max_bucket.max(bucket);
                    min_bucket = min_bucket.min(bucket);
                }
                bp = blk_next(bp);
            }
        }

        let max = histogram.iter().copied().max().unwrap_or(0);
        let scale = if max > 50 { max / 50 } else { 1 };

        println!();
        println!("Heap size: {} bytes", self.capacity());
        println!("Used: {full} blocks ({used} bytes)");
        println!("Free: {empty} blocks ({free} bytes)");
        for i in min_bucket..=max_bucket.min(BUCKETS - 1) {
            print!("{:>10} ", 1usize << i);
            for _ in 0..histogram[i] / scale {
                print!("x");
            }
            if histogram[i] > 0 {
                print!(" ({})", histogram[i]);
            }
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 64 * 1024;

    fn region() -> Region {
        Region::create(None, CAP, 0).unwrap()
    }

    /// Walk the heap asserting the structural invariants: head equals
    /// foot, block sizes partition the capacity exactly, no two adjacent
    /// free blocks, and the cursor names a block head.
    fn check(region: &Region) {
        unsafe {
            let heap = region.heap_base();
            let end = heap as usize + region.capacity();
            let cursor = region.header().cursor as usize;
            let mut bp = heap;
            let mut sum = 0;
            let mut prev_free = false;
            let mut cursor_on_head = false;

            while (bp as usize) < end {
                let size = blk_size(bp);
                assert!(size >= MIN_BLOCK && size % ALIGNMENT == 0, "bad size {size}");
                let foot = (bp.add(size - META) as *const u64).read();
                assert_eq!(mark(bp), foot, "head/foot mismatch");
                let free = !blk_used(bp);
                assert!(!(prev_free && free), "adjacent free blocks");
                prev_free = free;
                if bp.offset_from(heap) as usize == cursor {
                    cursor_on_head = true;
                }
                sum += size;
                bp = bp.add(size);
            }
            assert_eq!(sum, region.capacity(), "blocks do not partition heap");
            assert!(cursor_on_head, "cursor points inside a block");
        }
    }

    #[test]
    fn fresh_heap_is_one_free_block() {
        let region = region();
        check(&region);
        assert_eq!(region.available(), CAP);
    }

    #[test]
    fn alloc_and_free_keep_invariants() {
        let mut region = region();
        let mut live = Vec::new();
        for size in [1, 8, 24, 100, 4096, 33] {
            live.push(region.alloc(size).unwrap());
            check(&region);
        }
        for off in live {
            region.free(off);
            check(&region);
        }
        assert_eq!(region.available(), CAP);
    }

    #[test]
    fn small_remainder_consumes_whole_block() {
        let mut region = region();

        // Saturate the heap so the only free block is one we free below.
        let mut live = Vec::new();
        while let Some(off) = region.alloc(1000) {
            live.push(off);
        }
        while let Some(off) = region.alloc(8) {
            live.push(off);
        }
        assert_eq!(region.available(), 0);

        // 1000 + two meta words rounds to a 1016-byte block. Asking for
        // 992 needs 1008; the 8-byte remainder cannot stand alone, so the
        // whole 1016-byte block must be handed out.
        let victim = live.swap_remove(3);
        region.free(victim);
        assert_eq!(region.available(), 1016);

        let again = region.alloc(992).unwrap();
        assert_eq!(again, victim);
        assert_eq!(region.available(), 0);
        check(&region);

        region.free(again);
        for off in live {
            region.free(off);
        }
        assert_eq!(region.available(), CAP);
        check(&region);
    }

    #[test]
    fn cursor_follows_coalescing() {
        let mut region = region();
        let a = region.alloc(64).unwrap();
        let b = region.alloc(64).unwrap();
        let c = region.alloc(64).unwrap();
        let d = region.alloc(64).unwrap();

        // Cursor sits on d's block. Freeing c then d merges d into c and
        // must drag the cursor to the merged head.
        region.free(c);
        check(&region);
        region.free(d);
        check(&region);

        // Cursor now sits on the merged block; freeing b coalesces across
        // it and must pull the cursor back again.
        region.free(b);
        check(&region);

        region.free(a);
        check(&region);
        assert_eq!(region.available(), CAP);
    }

    #[test]
    fn interleaved_frees_coalesce() {
        let mut region = region();
        let blocks: Vec<_> = (0..32).map(|_| region.alloc(64).unwrap()).collect();
        for off in blocks.iter().step_by(2) {
            region.free(*off);
            check(&region);
        }
        for off in blocks.iter().skip(1).step_by(2) {
            region.free(*off);
            check(&region);
        }
        assert_eq!(region.available(), CAP);
    }

    #[test]
    fn next_fit_wraps_around() {
        let mut region = region();
        let mut live = Vec::new();
        while let Some(off) = region.alloc(1000) {
            live.push(off);
        }

        // Free an early block, leaving the cursor near the end of the
        // heap: the search has to wrap to find it.
        let early = live.remove(1);
        region.free(early);
        let wrapped = region.alloc(1000).unwrap();
        assert_eq!(wrapped, early);
        check(&region);

        region.free(wrapped);
        for off in live {
            region.free(off);
        }
        assert_eq!(region.available(), CAP);
    }
}
