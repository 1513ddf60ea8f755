//! Physical memory through `/dev/mem`

use crate::{
    sdt::{Bridge, MapError},
    Error, PhysAddr,
};
use core::ptr::{self, NonNull};
use std::{fs::File, io, os::fd::AsRawFd, path::Path};

pub const DEV_MEM: &str = "/dev/mem";

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Read-only, private mappings of a physical memory device.
pub struct DevMem {
    file: File,
    page_size: usize,
}

impl DevMem {
    pub fn open(path: &Path) -> Result<DevMem, Error> {
        let file = File::open(path).map_err(|source| Error::DeviceOpen {
            path: path.to_owned(),
            source,
        })?;
        Ok(DevMem {
            file,
            page_size: page_size(),
        })
    }

    #[inline]
    fn page_offset(&self, addr: usize) -> usize {
        addr & (self.page_size - 1)
    }
}

fn page_size() -> usize {
    // SAFETY: `sysconf` has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size)
        .ok()
        .filter(|size| size.is_power_of_two())
        .unwrap_or(FALLBACK_PAGE_SIZE)
}

unsafe impl Bridge for &DevMem {
    fn map(&self, phys: PhysAddr, size: usize) -> Result<NonNull<u8>, MapError> {
        let fail = |source: io::Error| MapError { phys, size, source };

        // mmap wants a page aligned offset; map from the start of the page and hand back
        // a pointer to the requested byte.
        let offset = self.page_offset(phys.as_usize());
        let aligned = libc::off_t::try_from(phys.as_usize() - offset)
            .map_err(|_| fail(io::Error::from(io::ErrorKind::InvalidInput)))?;

        // SAFETY: a fresh read-only mapping does not alias any Rust object.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size + offset,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                self.file.as_raw_fd(),
                aligned,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(fail(io::Error::last_os_error()));
        }
        log::trace!("mapped {size:#x} bytes at {phys}");

        let virt = base.cast::<u8>().wrapping_add(offset);
        NonNull::new(virt).ok_or_else(|| fail(io::Error::from(io::ErrorKind::AddrNotAvailable)))
    }

    unsafe fn unmap(&self, virt: NonNull<u8>, size: usize) {
        let offset = self.page_offset(virt.as_ptr() as usize);
        let base = virt.as_ptr().wrapping_sub(offset);
        if libc::munmap(base.cast(), size + offset) != 0 {
            log::warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}
