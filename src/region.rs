//! Region bootstrap: acquire or attach the contiguous byte range governed
//! by one allocator instance.
//!
//! A private region is anonymous memory local to this process. A named
//! region is a file mapping shared between cooperating processes; exactly
//! one of them wins the exclusive create and initializes the header and
//! heap, every other process attaches and spins until the initializer
//! publishes the segment identifier into the header word.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use memmap2::MmapMut;

use crate::heap;
use crate::layout::{self, Header, HEADER_SIZE};

/// Where the backing files for named regions live.
fn shm_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        PathBuf::from("/dev/shm")
    } else {
        // macOS and other Unix: use TMPDIR
        std::env::temp_dir().join("offmem")
    }
}

fn region_path(name: &str) -> PathBuf {
    shm_dir().join(format!("{name}.mem"))
}

/// How long an attacher waits for the initializer before giving up.
const ATTACH_TIMEOUT: Duration = Duration::from_secs(5);
const ATTACH_POLL: Duration = Duration::from_micros(10);

#[derive(Debug)]
enum Backing {
    Private(MmapMut),
    Shared(MmapMut),
}

/// One process's mapping of a region.
///
/// Dropping the handle detaches the mapping; it never deletes a named
/// region's backing segment. Use [`Region::unlink`] when the segment
/// itself should go away.
#[derive(Debug)]
pub struct Region {
    backing: Backing,
}

impl Region {
    /// Create or attach a region of `capacity` usable heap bytes, with
    /// `headroom` caller-reserved bytes between header and heap area.
    ///
    /// With a `name`, the region is shared: the first caller to create the
    /// backing file initializes it, and every later caller attaches, waits
    /// for the header to be published, and verifies that the capacity
    /// matches its own request. Without a name the backing is private
    /// anonymous memory.
    pub fn create(name: Option<&str>, capacity: usize, headroom: usize) -> io::Result<Region> {
        if capacity < heap::MIN_BLOCK || capacity % heap::ALIGNMENT != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "capacity must be a multiple of {} and at least {}",
                    heap::ALIGNMENT,
                    heap::MIN_BLOCK
                ),
            ));
        }

        let page = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } as usize;
        let total = layout::region_size(capacity, headroom, page);

        match name {
            None => {
                let mmap = MmapMut::map_anon(total)?;
                let mut region = Region {
                    backing: Backing::Private(mmap),
                };
                region.init(capacity, headroom, 0);
                Ok(region)
            }
            Some(name) => Self::create_shared(name, capacity, headroom, total),
        }
    }

    fn create_shared(
        name: &str,
        capacity: usize,
        headroom: usize,
        total: usize,
    ) -> io::Result<Region> {
        let dir = shm_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = region_path(name);

        match fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                // Won the exclusive create: this process initializes.
                file.set_len(total as u64)?;
                let seg_id = file_id(&file)?;
                let mmap = unsafe { MmapMut::map_mut(&file)? };
                let mut region = Region {
                    backing: Backing::Shared(mmap),
                };
                region.init(capacity, headroom, seg_id);
                Ok(region)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Self::attach(&path, capacity),
            Err(e) => Err(e),
        }
    }

    /// Initializer path: write the header, zero the heap area and install
    /// the single spanning free block. The `seg_id` store comes last; it
    /// is the release barrier attachers synchronize with.
    fn init(&mut self, capacity: usize, headroom: usize, seg_id: u64) {
        let base = self.base_ptr();
        unsafe {
            let header = &mut *(base as *mut Header);
            header.size = capacity as u64;
            header.cursor = 0;
            header.headroom = headroom as u64;

            let heap = base.add(layout::heap_offset(headroom));
            ptr::write_bytes(heap, 0, capacity);
            heap::format(heap, capacity);

            header.seg_id.store(seg_id, Ordering::Release);
        }
    }

    /// Attacher path: map the existing backing file and spin, bounded,
    /// until the initializer publishes the segment identifier, then check
    /// the capacity against this caller's request.
    fn attach(path: &Path, capacity: usize) -> io::Result<Region> {
        let deadline = Instant::now() + ATTACH_TIMEOUT;

        // The initializer sizes the file in a single set_len before any
        // header store, so a zero length means creation is in flight.
        let file = loop {
            let file = fs::OpenOptions::new().read(true).write(true).open(path)?;
            if file.metadata()?.len() > 0 {
                break file;
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "shared region was never sized",
                ));
            }
            thread::sleep(ATTACH_POLL);
        };

        let seg_id = file_id(&file)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let region = Region {
            backing: Backing::Shared(mmap),
        };

        while region.header().seg_id.load(Ordering::Acquire) != seg_id {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "shared region was never published",
                ));
            }
            thread::sleep(ATTACH_POLL);
        }

        let found = region.header().size as usize;
        if found != capacity {
            // Incompatible segment; Drop detaches the mapping.
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("shared region holds {found} bytes, caller requested {capacity}"),
            ));
        }
        Ok(region)
    }

    /// Remove a named region's backing file. Existing attachments stay
    /// valid until dropped; segment lifecycle is external to the
    /// allocator.
    pub fn unlink(name: &str) -> io::Result<()> {
        fs::remove_file(region_path(name))
    }

    /// Base address of this process's mapping. Valid only within this
    /// process and only for the lifetime of the handle; it is the `base`
    /// argument for the container operations.
    pub fn base_ptr(&self) -> *mut u8 {
        match &self.backing {
            Backing::Private(m) => m.as_ptr() as *mut u8,
            Backing::Shared(m) => m.as_ptr() as *mut u8,
        }
    }

    pub(crate) fn header(&self) -> &Header {
        unsafe { &*(self.base_ptr() as *const Header) }
    }

    /// Caller must hold the single-mutator guarantee.
    pub(crate) unsafe fn header_mut(&mut self) -> &mut Header {
        &mut *(self.base_ptr() as *mut Header)
    }

    /// Usable heap capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.header().size as usize
    }

    /// Caller-reserved bytes between header and heap area.
    pub fn headroom(&self) -> usize {
        self.header().headroom as usize
    }

    /// Start of the caller-reserved headroom window.
    pub fn headroom_ptr(&self) -> *mut u8 {
        unsafe { self.base_ptr().add(HEADER_SIZE) }
    }

    pub(crate) fn heap_base(&self) -> *mut u8 {
        unsafe { self.base_ptr().add(layout::heap_offset(self.headroom())) }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.backing, Backing::Shared(_))
    }
}

/// The identifier published in the header: the backing file's inode,
/// which every attacher can recover from its own handle on the file.
fn file_id(file: &fs::File) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(file.metadata()?.ino())
}
