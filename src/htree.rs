//! Path-addressed tree composing the heap and the hash table.
//!
//! Nodes are keyed by `/`-separated path segments. Each node's children
//! hang off a lazily created 32-bucket table keyed by the djb2 hash of
//! the segment. Node structs, key bytes and child tables are all region
//! allocations, so the whole tree is position independent and survives
//! remapping at a different base address.

use std::mem;
use std::ptr;
use std::slice;

use crate::htable::{self, HTable};
use crate::list::ListNode;
use crate::offset::{to_off, to_ptr, Off};
use crate::region::Region;

/// Bucket count of every child table.
const CHILD_BUCKETS: usize = 32;

/// Tree node header. Embed it as the first field of a larger struct and
/// pass that struct's size to [`add`]; the embedded link must stay first
/// so the node can live in its parent's bucket chain.
#[repr(C)]
#[derive(Debug)]
pub struct TreeNode {
    link: ListNode,
    parent: Off,
    /// Child `HTable`, null until the first child arrives.
    children: Off,
    /// Key bytes in their own region allocation; null only on the root.
    key: Off,
    key_len: u64,
}

impl TreeNode {
    /// The path segment naming this node, or `None` on the root.
    ///
    /// # Safety
    /// `base` must be the base address of the region this node lives in.
    pub unsafe fn key<'a>(&self, base: *mut u8) -> Option<&'a str> {
        if self.key.is_null() {
            return None;
        }
        let bytes = slice::from_raw_parts(to_ptr(base, self.key), self.key_len as usize);
        Some(std::str::from_utf8_unchecked(bytes))
    }
}

unsafe fn tnode(base: *mut u8, off: Off) -> *mut TreeNode {
    to_ptr(base, off).cast()
}

/// Allocate a zeroed root node of `size` bytes. The root carries no key
/// and is never pruned by [`delete`]; returns the null offset on an
/// undersized request or when the heap is exhausted.
pub fn root(region: &mut Region, size: usize) -> Off {
    if size < mem::size_of::<TreeNode>() {
        return Off::NULL;
    }
    match region.alloc(size) {
        Some(off) => {
            unsafe { ptr::write_bytes(to_ptr(region.base_ptr(), off), 0, size) };
            off
        }
        None => Off::NULL,
    }
}

unsafe fn key_matches(base: *mut u8, e: *mut ListNode, seg: &str) -> bool {
    let t = e.cast::<TreeNode>();
    if (*t).key.is_null() {
        return false;
    }
    let bytes = slice::from_raw_parts(to_ptr(base, (*t).key), (*t).key_len as usize);
    bytes == seg.as_bytes()
}

unsafe fn find_child(base: *mut u8, parent: *mut TreeNode, seg: &str) -> *mut TreeNode {
    if (*parent).children.is_null() {
        return ptr::null_mut();
    }
    let table = to_ptr(base, (*parent).children).cast::<HTable>();
    htable::find(base, table, htable::strhash(seg), |e| {
        key_matches(base, e, seg)
    })
    .cast()
}

/// Look up `path` from `root` without creating anything. Returns the node
/// offset, `root` itself for an empty path, or the null offset when any
/// segment is missing.
///
/// # Safety
/// `base`-relative: `root` must be a valid tree node in `region`.
pub unsafe fn get(region: &Region, root: Off, path: &str) -> Off {
    let base = region.base_ptr();
    let mut cur = root;
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        let found = find_child(base, tnode(base, cur), seg);
        if found.is_null() {
            return Off::NULL;
        }
        cur = to_off(base, found.cast::<u8>());
    }
    cur
}

/// Ensure `path` exists under `root`, creating missing nodes of `size`
/// bytes each, and return the final node's offset.
///
/// `size` must cover `TreeNode`; new nodes are zeroed beyond the header,
/// so a caller's trailing fields start blank. Returns the null offset on
/// an undersized request or when the heap is exhausted.
///
/// # Safety
/// `root` must be a valid tree node in `region`.
pub unsafe fn add(region: &mut Region, root: Off, path: &str, size: usize) -> Off {
    if size < mem::size_of::<TreeNode>() {
        return Off::NULL;
    }
    let mut parent = root;
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        let base = region.base_ptr();
        let existing = find_child(base, tnode(base, parent), seg);
        if !existing.is_null() {
            parent = to_off(base, existing.cast::<u8>());
            continue;
        }
        parent = match new_child(region, parent, seg, size) {
            Some(off) => off,
            None => return Off::NULL,
        };
    }
    parent
}

unsafe fn new_child(region: &mut Region, parent: Off, seg: &str, size: usize) -> Option<Off> {
    let node_off = region.alloc(size)?;
    let key_off = match region.alloc(seg.len()) {
        Some(off) => off,
        None => {
            region.free(node_off);
            return None;
        }
    };

    let base = region.base_ptr();
    let node = tnode(base, node_off);
    ptr::write_bytes(node.cast::<u8>(), 0, size);
    (*node).parent = parent;
    (*node).key = key_off;
    (*node).key_len = seg.len() as u64;
    ptr::copy_nonoverlapping(seg.as_ptr(), to_ptr(base, key_off), seg.len());

    if (*tnode(base, parent)).children.is_null() {
        let table_off = match region.alloc(HTable::bytes_for(CHILD_BUCKETS)) {
            Some(off) => off,
            None => {
                region.free(key_off);
                region.free(node_off);
                return None;
            }
        };
        htable::init(to_ptr(base, table_off).cast(), CHILD_BUCKETS);
        (*tnode(base, parent)).children = table_off;
    }
    let table = to_ptr(base, (*tnode(base, parent)).children).cast::<HTable>();
    htable::add(base, table, htable::strhash(seg), node.cast());
    Some(node_off)
}

unsafe fn subtree_empty(base: *mut u8, node: Off) -> bool {
    let t = tnode(base, node);
    (*t).children.is_null()
        || htable::size(base, to_ptr(base, (*t).children).cast()) == 0
}

/// Delete `node` and its whole subtree, returning its blocks to the heap.
///
/// The node is unlinked from its parent first; the subtree is then torn
/// down child by child, re-deriving the child table from the dying node
/// on every step so the walk never follows a freed table. Ancestors left
/// without children are pruned, except `root`. Deleting the root or the
/// null offset is a no-op.
///
/// # Safety
/// `root` and `node` must be valid tree nodes in `region`, with `node`
/// inside the tree rooted at `root`.
pub unsafe fn delete(region: &mut Region, root: Off, node: Off) {
    if node.is_null() {
        return;
    }
    let base = region.base_ptr();
    let t = tnode(base, node);
    if (*t).key.is_null() {
        return;
    }

    // Unlink from the parent chain, dropping the parent's child table
    // once it empties.
    let parent = (*t).parent;
    if !parent.is_null() {
        let p = tnode(base, parent);
        if !(*p).children.is_null() {
            let table = to_ptr(base, (*p).children).cast::<HTable>();
            let hash = htable::strhash((*t).key(base).unwrap_or(""));
            htable::delete(base, table, hash, t.cast());
            if htable::size(base, table) == 0 {
                let table_off = (*p).children;
                (*p).children = Off::NULL;
                region.free(table_off);
            }
        }
    }
    (*t).parent = Off::NULL;

    // Tear down the subtree. Each recursive delete unlinks the child
    // from this node's table and frees the table when the last child
    // goes, so the table offset is re-read every round.
    while !(*t).children.is_null() {
        let table = to_ptr(base, (*t).children).cast::<HTable>();
        let mut first = Off::NULL;
        for i in 0..(*table).buckets() {
            let mut cursor = 0;
            let child = htable::get(base, table, i as u64, &mut cursor);
            if !child.is_null() {
                first = to_off(base, child.cast::<u8>());
                break;
            }
        }
        if first.is_null() {
            break;
        }
        delete(region, node, first);
    }
    if !(*t).children.is_null() {
        let table_off = (*t).children;
        (*t).children = Off::NULL;
        region.free(table_off);
    }

    region.free((*t).key);
    region.free(node);

    // A parent left hanging without children disappears too, unless it
    // is the root of this deletion.
    if !parent.is_null() && parent != root && subtree_empty(base, parent) {
        delete(region, root, parent);
    }
}

/// Iterate `node`'s children in bucket order: pass the null offset for
/// the first child, then each returned offset for the one after it.
/// Returns the null offset past the last child.
///
/// # Safety
/// `node` must be a valid tree node in `region` and `prev` null or an
/// offset this function previously returned for `node`.
pub unsafe fn child(region: &Region, node: Off, prev: Off) -> Off {
    if node.is_null() {
        return Off::NULL;
    }
    let base = region.base_ptr();
    let t = tnode(base, node);
    if (*t).children.is_null() {
        return Off::NULL;
    }

    // Within one bucket the next sibling is one link away.
    if !prev.is_null() {
        let p = tnode(base, prev);
        if !(*p).link.next.is_null() {
            return (*p).link.next;
        }
    }

    let table = to_ptr(base, (*t).children).cast::<HTable>();
    let mut want_next = prev.is_null();
    for i in 0..(*table).buckets() {
        let mut cursor = 0;
        loop {
            let c = htable::get(base, table, i as u64, &mut cursor);
            if c.is_null() {
                break;
            }
            let c_off = to_off(base, c.cast::<u8>());
            if want_next {
                return c_off;
            }
            if c_off == prev {
                want_next = true;
            }
        }
    }
    Off::NULL
}
