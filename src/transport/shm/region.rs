/*!
 * Shared Region
 * One POSIX shared-memory object mapped read-write, header first
 */

use crate::core::errors::RpcError;
use crate::core::limits::SHM_HEADER_SIZE;
use crate::core::types::RpcResult;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, warn};

/// Mapped shared-memory object
///
/// Layout: `[i32 doorbell][body ...]`. The doorbell is accessed atomically;
/// the body is only touched by whichever side currently owns it under the
/// doorbell protocol.
pub struct SharedRegion {
    ptr: NonNull<c_void>,
    len: usize,
    name: String,
    unlink_on_drop: bool,
}

// SAFETY: the mapping stays valid for the lifetime of the value and is not
// tied to the creating thread. Cross-thread access goes through `&mut self`
// for the body and atomics for the doorbell.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Open or create `name` and map `len` bytes of it
    ///
    /// A freshly created object is zero-filled, so its doorbell reads 0.
    pub fn open(name: &str, len: usize, unlink_on_drop: bool) -> RpcResult<Self> {
        let size = NonZeroUsize::new(len)
            .filter(|n| n.get() > SHM_HEADER_SIZE)
            .ok_or_else(|| RpcError::Os(format!("region size {} is too small", len)))?;

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| RpcError::Os(format!("shm_open({}): {}", name, e)))?;
        let file = File::from(fd);

        let current = file.metadata()?.len();
        if current < len as u64 {
            file.set_len(len as u64)?;
        }

        // SAFETY: fresh mapping chosen by the kernel, backed by a file of at
        // least `len` bytes; nothing else aliases it inside this process.
        let ptr = unsafe {
            mmap(
                None,
                size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(|e| RpcError::Os(format!("mmap({}): {}", name, e)))?;

        debug!(name, len, existing = current > 0, "Mapped shared region");

        Ok(Self {
            ptr,
            len,
            name: name.to_string(),
            unlink_on_drop,
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes available after the header
    #[inline]
    #[must_use]
    pub fn body_capacity(&self) -> usize {
        self.len - SHM_HEADER_SIZE
    }

    fn doorbell(&self) -> &AtomicI32 {
        // SAFETY: the mapping is page aligned and at least header sized, and
        // every process touches the header only through atomics.
        unsafe { &*(self.ptr.as_ptr() as *const AtomicI32) }
    }

    #[inline]
    pub fn load_doorbell(&self) -> i32 {
        self.doorbell().load(Ordering::Acquire)
    }

    #[inline]
    pub fn store_doorbell(&self, value: i32) {
        self.doorbell().store(value, Ordering::Release);
    }

    pub fn body(&self) -> &[u8] {
        // SAFETY: in bounds of the mapping; the peer does not write the body
        // while the doorbell hands it to us.
        unsafe {
            std::slice::from_raw_parts(
                (self.ptr.as_ptr() as *const u8).add(SHM_HEADER_SIZE),
                self.body_capacity(),
            )
        }
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `body`, and `&mut self` rules out local aliasing.
        unsafe {
            std::slice::from_raw_parts_mut(
                (self.ptr.as_ptr() as *mut u8).add(SHM_HEADER_SIZE),
                self.body_capacity(),
            )
        }
    }

    /// Zero the whole region, doorbell included
    pub fn zero(&mut self) {
        self.store_doorbell(0);
        self.body_mut().fill(0);
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` come from the successful mmap in `open`.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!(name = %self.name, error = %e, "munmap failed");
        }
        if self.unlink_on_drop {
            match shm_unlink(self.name.as_str()) {
                Ok(()) => debug!(name = %self.name, "Unlinked shared region"),
                Err(nix::errno::Errno::ENOENT) => {}
                Err(e) => warn!(name = %self.name, error = %e, "shm_unlink failed"),
            }
        }
    }
}
