//! Cross-process reader-writer lock for callers sharing a region.
//!
//! The allocator itself holds no locks: one mutator at a time is the
//! caller's contract. For cooperating processes this module offers a
//! POSIX rwlock with the PROCESS_SHARED attribute, placed at the start of
//! the region's headroom so it travels with the segment. The region
//! initializer calls [`RegionLock::init`] once; attachers call
//! [`RegionLock::attach`].

use std::io;

use crate::region::Region;

/// A handle to a `pthread_rwlock_t` living in the region's headroom.
#[derive(Debug)]
pub struct RegionLock {
    raw: *mut libc::pthread_rwlock_t,
}

unsafe impl Send for RegionLock {}
unsafe impl Sync for RegionLock {}

impl RegionLock {
    /// Headroom bytes the lock occupies. `pthread_rwlock_t` is 56 bytes
    /// on x86_64 Linux and 200 bytes on macOS arm64; reserve generously.
    pub const SIZE: usize = 256;

    fn headroom_slot(region: &Region) -> io::Result<*mut libc::pthread_rwlock_t> {
        if region.headroom() < Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("region lock needs {} headroom bytes", Self::SIZE),
            ));
        }
        Ok(region.headroom_ptr() as *mut libc::pthread_rwlock_t)
    }

    /// Initialize a fresh lock in `region`'s headroom.
    ///
    /// Call exactly once, from the process that initialized the region,
    /// before any other process attaches the lock.
    pub fn init(region: &Region) -> io::Result<RegionLock> {
        let raw = Self::headroom_slot(region)?;
        unsafe {
            let mut attr: libc::pthread_rwlockattr_t = std::mem::zeroed();
            let ret = libc::pthread_rwlockattr_init(&mut attr);
            if ret != 0 {
                return Err(io::Error::from_raw_os_error(ret));
            }
            let ret = libc::pthread_rwlockattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            if ret != 0 {
                libc::pthread_rwlockattr_destroy(&mut attr);
                return Err(io::Error::from_raw_os_error(ret));
            }
            let ret = libc::pthread_rwlock_init(raw, &attr);
            libc::pthread_rwlockattr_destroy(&mut attr);
            if ret != 0 {
                return Err(io::Error::from_raw_os_error(ret));
            }
        }
        Ok(RegionLock { raw })
    }

    /// Bind to a lock another process already initialized in this
    /// region's headroom.
    pub fn attach(region: &Region) -> io::Result<RegionLock> {
        Ok(RegionLock {
            raw: Self::headroom_slot(region)?,
        })
    }

    /// Block until a shared read lock is held; released when the guard
    /// drops.
    pub fn read(&self) -> ReadGuard<'_> {
        let ret = unsafe { libc::pthread_rwlock_rdlock(self.raw) };
        debug_assert_eq!(ret, 0, "pthread_rwlock_rdlock failed: {ret}");
        ReadGuard { lock: self }
    }

    /// Block until the exclusive write lock is held; released when the
    /// guard drops.
    pub fn write(&self) -> WriteGuard<'_> {
        let ret = unsafe { libc::pthread_rwlock_wrlock(self.raw) };
        debug_assert_eq!(ret, 0, "pthread_rwlock_wrlock failed: {ret}");
        WriteGuard { lock: self }
    }

    /// Destroy the lock.
    ///
    /// # Safety
    /// No other process may still be using it.
    pub unsafe fn destroy(&self) {
        libc::pthread_rwlock_destroy(self.raw);
    }
}

pub struct ReadGuard<'a> {
    lock: &'a RegionLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let ret = unsafe { libc::pthread_rwlock_unlock(self.lock.raw) };
        debug_assert_eq!(ret, 0, "pthread_rwlock_unlock failed: {ret}");
    }
}

pub struct WriteGuard<'a> {
    lock: &'a RegionLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let ret = unsafe { libc::pthread_rwlock_unlock(self.lock.raw) };
        debug_assert_eq!(ret, 0, "pthread_rwlock_unlock failed: {ret}");
    }
}
