//! Simple Boot Flag Table

use super::{Header, Sdt, Signature};
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Boot Information Table
///
/// Names the CMOS register that holds the Simple Boot Flag. Firmware may declare a longer
/// table; only these 40 bytes are read.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BootTable {
    pub header: Header,
    cmos_index: u8,
    reserved: [u8; 3],
}

const_assert_eq!(size_of::<BootTable>(), 40);

impl Sdt for BootTable {
    const SIGNATURE: Signature = Signature(*b"BOOT");

    fn header(&self) -> &Header {
        &self.header
    }
}

impl BootTable {
    /// Index of the CMOS register holding the boot flag.
    #[inline]
    pub fn cmos_index(&self) -> u8 {
        self.cmos_index
    }
}
