//! The growth primitive behind the heap arena.
//!
//! The allocator itself never talks to the operating system. It sees one
//! contiguous byte range that can only get longer, through the
//! [`HeapStorage`] trait. This keeps the platform-dependent syscalls in one
//! place and lets the tests drive the allocator with a plain in-memory
//! buffer, including simulated exhaustion.
//!
//! Offsets handed out by [`HeapStorage::grow`] stay valid forever: a
//! storage extends its range in place, it never relocates or shrinks it.

use log::debug;

/// Abstraction over the low level memory requests of the allocator.
///
/// The arena addresses its blocks by offset into `bytes()`, so an
/// implementation must guarantee that every grow appends to the same
/// logical range and that previously returned offsets keep addressing the
/// same bytes.
pub trait HeapStorage {
    /// Extends the range by exactly `len` bytes, zero-filled, and returns
    /// the offset of the first new byte. `None` when the storage is
    /// exhausted, in which case the range is left untouched.
    fn grow(&mut self, len: usize) -> Option<usize>;

    /// Current length of the range in bytes.
    fn len(&self) -> usize;

    /// The whole range granted so far.
    fn bytes(&self) -> &[u8];

    /// Mutable view of the whole range granted so far.
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// In-memory storage with a hard byte limit.
///
/// This is the storage the tests and the demos run on: exhaustion is just
/// the limit, so out-of-memory paths can be exercised deterministically
/// without touching the operating system.
pub struct FixedStorage {
    buf: Vec<u8>,
    limit: usize,
}

impl FixedStorage {
    /// Creates an empty storage that will never grow past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }
}

impl HeapStorage for FixedStorage {
    fn grow(&mut self, len: usize) -> Option<usize> {
        let start = self.buf.len();
        let end = start.checked_add(len)?;
        if end > self.limit {
            debug!(
                "fixed storage exhausted: {} + {} exceeds limit {}",
                start, len, self.limit
            );
            return None;
        }
        self.buf.resize(end, 0);
        Some(start)
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

#[cfg(unix)]
mod unix {
    use super::HeapStorage;
    use crate::utils::align;

    use libc::{mmap, mprotect, munmap, off_t, size_t};
    use log::debug;

    use std::os::raw::{c_int, c_void};
    use std::ptr::NonNull;
    use std::slice;

    /// Storage backed by one anonymous memory mapping.
    ///
    /// The whole reservation is mapped up front with `PROT_NONE`, so the
    /// kernel keeps the address range contiguous for us, and pages are
    /// committed with `mprotect` as the arena grows. Nothing ever moves,
    /// which is what makes block offsets stable across growth.
    pub struct MmapStorage {
        base: NonNull<u8>,
        committed: usize,
        reserved: usize,
        page_size: usize,
    }

    impl MmapStorage {
        /// Reserves `capacity` bytes of address space, rounded up to the
        /// page size. Returns `None` if the kernel rejects the mapping.
        pub fn reserve(capacity: usize) -> Option<Self> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize };
            let reserved = align(capacity, page_size);

            unsafe {
                let addr = mmap(ADDR, reserved as size_t, libc::PROT_NONE, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => Some(Self {
                        base: NonNull::new_unchecked(addr).cast::<u8>(),
                        committed: 0,
                        reserved,
                        page_size,
                    }),
                }
            }
        }
    }

    impl HeapStorage for MmapStorage {
        fn grow(&mut self, len: usize) -> Option<usize> {
            let end = self.committed.checked_add(len)?;
            if end > self.reserved {
                debug!(
                    "mmap storage exhausted: {} exceeds reservation {}",
                    end, self.reserved
                );
                return None;
            }

            // Commit whole pages; the tail of the last committed page is
            // handed out by later grows without another syscall.
            let committed_pages = align(self.committed, self.page_size);
            let needed_pages = align(end, self.page_size);
            if needed_pages > committed_pages {
                let ok = unsafe {
                    mprotect(
                        self.base.as_ptr().add(committed_pages) as *mut c_void,
                        (needed_pages - committed_pages) as size_t,
                        libc::PROT_READ | libc::PROT_WRITE,
                    )
                };
                if ok != 0 {
                    return None;
                }
            }

            let start = self.committed;
            self.committed = end;
            Some(start)
        }

        fn len(&self) -> usize {
            self.committed
        }

        fn bytes(&self) -> &[u8] {
            unsafe { slice::from_raw_parts(self.base.as_ptr(), self.committed) }
        }

        fn bytes_mut(&mut self) -> &mut [u8] {
            unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.committed) }
        }
    }

    impl Drop for MmapStorage {
        fn drop(&mut self) {
            unsafe {
                munmap(self.base.as_ptr() as *mut c_void, self.reserved as size_t);
            }
        }
    }
}

#[cfg(unix)]
pub use unix::MmapStorage;

#[cfg(windows)]
mod win {
    use super::HeapStorage;
    use crate::utils::align;

    use log::debug;
    use windows::Win32::System::{Memory, SystemInformation};

    use std::mem::MaybeUninit;
    use std::os::raw::c_void;
    use std::ptr::NonNull;
    use std::slice;

    /// Storage backed by one reserved virtual address range.
    ///
    /// The range is reserved with `MEM_RESERVE` up front and committed
    /// page by page with `MEM_COMMIT` as the arena grows, mirroring what
    /// [`super::MmapStorage`] does on unix.
    pub struct VirtualAllocStorage {
        base: NonNull<u8>,
        committed: usize,
        reserved: usize,
        page_size: usize,
    }

    impl VirtualAllocStorage {
        /// Reserves `capacity` bytes of address space, rounded up to the
        /// page size. Returns `None` if the reservation fails.
        pub fn reserve(capacity: usize) -> Option<Self> {
            let page_size = unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            };
            let reserved = align(capacity, page_size);

            unsafe {
                let addr =
                    Memory::VirtualAlloc(None, reserved, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast::<u8>()).map(|base| Self {
                    base,
                    committed: 0,
                    reserved,
                    page_size,
                })
            }
        }
    }

    impl HeapStorage for VirtualAllocStorage {
        fn grow(&mut self, len: usize) -> Option<usize> {
            let end = self.committed.checked_add(len)?;
            if end > self.reserved {
                debug!(
                    "virtual storage exhausted: {} exceeds reservation {}",
                    end, self.reserved
                );
                return None;
            }

            let committed_pages = align(self.committed, self.page_size);
            let needed_pages = align(end, self.page_size);
            if needed_pages > committed_pages {
                let granted = unsafe {
                    Memory::VirtualAlloc(
                        Some(self.base.as_ptr().add(committed_pages) as *const c_void),
                        needed_pages - committed_pages,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    )
                };
                if granted.is_null() {
                    return None;
                }
            }

            let start = self.committed;
            self.committed = end;
            Some(start)
        }

        fn len(&self) -> usize {
            self.committed
        }

        fn bytes(&self) -> &[u8] {
            unsafe { slice::from_raw_parts(self.base.as_ptr(), self.committed) }
        }

        fn bytes_mut(&mut self) -> &mut [u8] {
            unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.committed) }
        }
    }

    impl Drop for VirtualAllocStorage {
        fn drop(&mut self) {
            unsafe {
                let _ = Memory::VirtualFree(
                    self.base.as_ptr() as *mut c_void,
                    0,
                    Memory::MEM_RELEASE,
                );
            }
        }
    }
}

#[cfg(windows)]
pub use win::VirtualAllocStorage;
