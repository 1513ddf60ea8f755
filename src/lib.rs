//! Simple Boot Flag
//!
//! Locates the ACPI `BOOT` table through the legacy BIOS root pointer and uses it to clear
//! the boot-in-progress bits of the CMOS status register it names, telling the firmware that
//! the previous boot finished and a full POST can be skipped.

pub mod cmos;
pub mod error;
pub mod logger;
pub mod mem;
pub mod ports;
pub mod run;
pub mod sdt;

pub use error::Error;
pub use sdt::{Bridge, MapError, RootTable, Sdt, Table};

use core::{fmt, mem::size_of};
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[allow(non_camel_case_types)]
pub type u32_le = zerocopy::U32<zerocopy::LittleEndian>;

/// Start of the BIOS read-only memory area searched for the root pointer.
pub const BIOS_ROM_BASE: PhysAddr = PhysAddr::new(0x000e_0000);
/// Size of the BIOS read-only memory area, up to the 1 MiB boundary.
pub const BIOS_ROM_SIZE: usize = 0x0010_0000 - 0x000e_0000;

pub const RSDP_SIGNATURE: [u8; 8] = *b"RSD PTR ";
const RSDP_ALIGN: usize = 16;

/// A 32-bit physical address
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PhysAddr(u32);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub fn checked_add(self, offset: usize) -> Option<Self> {
        let offset = u32::try_from(offset).ok()?;
        self.0.checked_add(offset).map(Self)
    }
}

impl From<u32> for PhysAddr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// ACPI 1.0 Root System Description Pointer
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Rsdp {
    pub signature: [u8; 8],
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub reserved: u8,
    rsdt_addr: u32_le,
}

const_assert_eq!(size_of::<Rsdp>(), 20);

impl Rsdp {
    #[inline]
    pub fn rsdt_addr(&self) -> PhysAddr {
        PhysAddr::new(self.rsdt_addr.get())
    }

    /// Returns `true` if all bytes of the pointer sum to zero.
    ///
    /// The scan does not require this; a mismatch is only reported.
    pub fn checksum_ok(&self) -> bool {
        self.as_bytes()
            .iter()
            .fold(0u8, |sum, &byte| sum.wrapping_add(byte))
            == 0
    }
}

/// Scans `size` bytes of physical memory at `base` for the root pointer.
///
/// Candidates are only considered on 16-byte boundaries, and only where a whole [`Rsdp`]
/// fits inside the window. Returns the physical address of the first match together with a
/// copy of the pointer. A window that cannot be mapped is treated like one without a match.
pub fn find_rsdp<B: Bridge>(bridge: B, base: PhysAddr, size: usize) -> Option<(PhysAddr, Rsdp)> {
    let window = match sdt::Mapped::new(bridge, base, size) {
        Ok(window) => window,
        Err(err) => {
            log::warn!("{err}");
            return None;
        }
    };

    let found = (0..size).step_by(RSDP_ALIGN).find_map(|offset| {
        let (rsdp, _) = Rsdp::read_from_prefix(window.get(offset..)?).ok()?;
        if rsdp.signature != RSDP_SIGNATURE {
            return None;
        }
        Some((base.checked_add(offset)?, rsdp))
    });

    if let Some((addr, rsdp)) = &found {
        log::debug!(
            "RSDP @ {addr}, OEM {:?}, RSDT @ {}",
            String::from_utf8_lossy(&rsdp.oem_id),
            rsdp.rsdt_addr()
        );
        if !rsdp.checksum_ok() {
            log::warn!("RSDP @ {addr} has a bad checksum");
        }
    }
    found
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeMemory};

    #[test]
    fn finds_aligned_root_pointer() {
        let mut mem = FakeMemory::new(0x400);
        mem.write(0x1a0, &testing::rsdp(0x1234_5678));

        let (addr, rsdp) = find_rsdp(&mem, PhysAddr::new(0x100), 0x200).unwrap();
        assert_eq!(addr, PhysAddr::new(0x1a0));
        assert_eq!(rsdp.rsdt_addr(), PhysAddr::new(0x1234_5678));
        assert!(rsdp.checksum_ok());
        assert_eq!(mem.live(), 0);
        assert_eq!(*mem.maps.borrow(), [(PhysAddr::new(0x100), 0x200)]);
    }

    #[test]
    fn returns_first_match() {
        let mut mem = FakeMemory::new(0x400);
        mem.write(0x130, &testing::rsdp(0x1111));
        mem.write(0x180, &testing::rsdp(0x2222));

        let (addr, rsdp) = find_rsdp(&mem, PhysAddr::new(0x100), 0x200).unwrap();
        assert_eq!(addr, PhysAddr::new(0x130));
        assert_eq!(rsdp.rsdt_addr(), PhysAddr::new(0x1111));
    }

    #[test]
    fn ignores_unaligned_signature() {
        let mut mem = FakeMemory::new(0x400);
        mem.write(0x108, &testing::rsdp(0x1234));

        assert!(find_rsdp(&mem, PhysAddr::new(0x100), 0x200).is_none());
        assert_eq!(mem.live(), 0);
    }

    #[test]
    fn missing_signature_is_not_found() {
        let mem = FakeMemory::new(0x400);
        assert!(find_rsdp(&mem, PhysAddr::new(0x100), 0x200).is_none());
    }

    #[test]
    fn unmappable_window_is_not_found() {
        let mem = FakeMemory::new(0x100);
        assert!(find_rsdp(&mem, PhysAddr::new(0x80), 0x200).is_none());
        assert_eq!(mem.live(), 0);
    }

    #[test]
    fn bad_checksum_is_still_returned() {
        let mut mem = FakeMemory::new(0x400);
        let mut rsdp = testing::rsdp(0x4000);
        rsdp[8] = rsdp[8].wrapping_add(1);
        mem.write(0x200, &rsdp);

        let (addr, rsdp) = find_rsdp(&mem, PhysAddr::new(0x100), 0x200).unwrap();
        assert_eq!(addr, PhysAddr::new(0x200));
        assert!(!rsdp.checksum_ok());
    }

    #[test]
    fn phys_addr_formats_like_firmware_dumps() {
        assert_eq!(PhysAddr::new(0xf_a5c0).to_string(), "0x000fa5c0");
        assert_eq!(PhysAddr::new(u32::MAX).checked_add(1), None);
    }
}
