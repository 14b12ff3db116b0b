//! Named-region rendezvous: two handles mapping the same segment, the
//! capacity check, and the headroom lock.

use std::io;

use offmem::{Region, RegionLock};

const HEAP_SIZE: usize = 8 * 1024 * 1024;

#[test]
fn private_region_is_not_shared() {
    let region = Region::create(None, HEAP_SIZE, 0).unwrap();
    assert!(!region.is_shared());
}

#[test]
fn rejects_unusable_capacity() {
    for capacity in [0, 7, 8, 1001] {
        let err = Region::create(None, capacity, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}

#[test]
fn attach_sees_same_region() {
    let name = "offmem-test-attach";
    let _ = Region::unlink(name);

    let mut first = Region::create(Some(name), HEAP_SIZE, 0).unwrap();
    let second = Region::create(Some(name), HEAP_SIZE, 0).unwrap();
    assert!(first.is_shared() && second.is_shared());
    assert_ne!(first.base_ptr(), second.base_ptr());
    assert_eq!(second.capacity(), first.capacity());
    assert_eq!(second.available(), HEAP_SIZE);

    // An allocation through one handle is visible through the other.
    let m = first.alloc(1000).unwrap();
    assert_eq!(second.available(), first.available());
    assert!(second.available() < HEAP_SIZE);
    first.free(m);
    assert_eq!(second.available(), HEAP_SIZE);

    drop(second);
    assert_eq!(first.available(), HEAP_SIZE);
    drop(first);
    Region::unlink(name).unwrap();
}

#[test]
fn attach_rejects_capacity_mismatch() {
    let name = "offmem-test-mismatch";
    let _ = Region::unlink(name);

    let _first = Region::create(Some(name), HEAP_SIZE, 0).unwrap();
    let err = Region::create(Some(name), HEAP_SIZE / 2, 0).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    Region::unlink(name).unwrap();
}

#[test]
fn headroom_is_reserved_for_the_caller() {
    let mut region = Region::create(None, HEAP_SIZE, 128).unwrap();
    assert_eq!(region.headroom(), 128);
    assert_eq!(region.available(), HEAP_SIZE);

    // The heap never hands out headroom bytes.
    unsafe { region.headroom_ptr().write_bytes(0xAB, 128) };
    let m = region.alloc(64).unwrap();
    unsafe {
        for i in 0..128 {
            assert_eq!(region.headroom_ptr().add(i).read(), 0xAB);
        }
    }
    region.free(m);
}

#[test]
fn region_lock_guards_both_handles() {
    let name = "offmem-test-lock";
    let _ = Region::unlink(name);

    let mut first = Region::create(Some(name), HEAP_SIZE, RegionLock::SIZE).unwrap();
    let lock = RegionLock::init(&first).unwrap();

    let second = Region::create(Some(name), HEAP_SIZE, RegionLock::SIZE).unwrap();
    let peer = RegionLock::attach(&second).unwrap();

    let m = {
        let _guard = lock.write();
        first.alloc(64).unwrap()
    };
    {
        let _guard = peer.read();
        assert_eq!(second.available(), first.available());
    }
    {
        let _guard = lock.write();
        first.free(m);
    }
    assert_eq!(second.available(), HEAP_SIZE);

    unsafe { lock.destroy() };
    drop(second);
    drop(first);
    Region::unlink(name).unwrap();
}

#[test]
fn lock_requires_enough_headroom() {
    let region = Region::create(None, HEAP_SIZE, 0).unwrap();
    let err = RegionLock::init(&region).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}
