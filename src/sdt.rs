use crate::{u32_le, PhysAddr, Rsdp};
use core::{fmt, mem::size_of, ptr::NonNull};
use static_assertions::const_assert_eq;
use std::io;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub mod boot;

pub use boot::BootTable;
pub use mapped::Mapped;

/// Access to the physical address space
///
/// # Safety
///
/// A pointer returned by [`map`](Bridge::map) must be valid for reads of `size` bytes until
/// it is handed back to [`unmap`](Bridge::unmap) with the same `size`.
pub unsafe trait Bridge: Copy {
    /// Maps `size` bytes of physical memory starting at `phys`.
    ///
    /// `phys` need not be page aligned; the returned pointer refers to the byte at `phys`.
    fn map(&self, phys: PhysAddr, size: usize) -> Result<NonNull<u8>, MapError>;

    /// Releases a mapping.
    ///
    /// # Safety
    ///
    /// `virt` and `size` must be the result and length of one earlier call to `map`, and the
    /// mapped bytes must not be accessed afterwards.
    unsafe fn unmap(&self, virt: NonNull<u8>, size: usize);
}

#[derive(Debug, thiserror::Error)]
#[error("cannot map {size:#x} bytes at {phys}")]
pub struct MapError {
    pub phys: PhysAddr,
    pub size: usize,
    #[source]
    pub source: io::Error,
}

mod mapped {
    use super::{Bridge, MapError};
    use crate::PhysAddr;
    use core::{ops::Deref, ptr::NonNull, slice};

    /// A window of physical memory, released when dropped.
    ///
    /// The window remembers its own length, so it is always released with the size it was
    /// mapped with.
    pub struct Mapped<B: Bridge> {
        ptr: NonNull<u8>,
        len: usize,
        bridge: B,
    }

    impl<B: Bridge> Drop for Mapped<B> {
        fn drop(&mut self) {
            unsafe { self.bridge.unmap(self.ptr, self.len) }
        }
    }

    impl<B: Bridge> Mapped<B> {
        pub fn new(bridge: B, phys: PhysAddr, len: usize) -> Result<Mapped<B>, MapError> {
            let ptr = bridge.map(phys, len)?;
            Ok(Mapped { ptr, len, bridge })
        }
    }

    impl<B: Bridge> Deref for Mapped<B> {
        type Target = [u8];

        fn deref(&self) -> &Self::Target {
            // SAFETY: `Bridge::map` guarantees `len` readable bytes until we unmap in `drop`.
            unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
        }
    }
}

/// System Description Table
///
/// Implemented by table layouts that start with a [`Header`]. Only the leading
/// `size_of::<Self>()` bytes of a table are ever read into `Self`.
pub trait Sdt: FromBytes + KnownLayout + Immutable + Unaligned {
    /// Table Signature
    ///
    /// Table-specific signature found in the `signature` field of [`Header`].
    const SIGNATURE: Signature;

    fn header(&self) -> &Header;
}

#[repr(transparent)]
#[derive(
    Clone,
    Copy,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
pub struct Signature(pub [u8; 4]);

impl Signature {
    fn printable(&self) -> String {
        self.0
            .iter()
            .map(|&byte| match byte {
                b' '..=b'~' => char::from(byte),
                _ => '?',
            })
            .collect()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.printable())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.printable())
    }
}

/// System Description Table Header
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Header {
    pub signature: Signature,
    pub length: u32_le,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32_le,
    pub creator_id: u32_le,
    pub creator_revision: u32_le,
}

const_assert_eq!(size_of::<Header>(), 36);

impl Header {
    /// Declared length of the whole table, header included.
    #[inline]
    pub fn length(&self) -> u32 {
        self.length.get()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("declared length {length:#x} is shorter than a table header")]
    Truncated { length: u32 },
}

/// A mapped description table of any type
pub struct Table<B: Bridge> {
    header: Header,
    region: Mapped<B>,
}

impl<B: Bridge> Table<B> {
    /// Maps the table at `phys`.
    ///
    /// The header is mapped first to learn the table's length. That mapping is released
    /// before the whole table is mapped again at its declared length, so the returned table
    /// never exposes bytes past the end the firmware declared.
    pub fn map(bridge: B, phys: PhysAddr) -> Result<Table<B>, TableError> {
        let length = {
            let head = Mapped::new(bridge, phys, size_of::<Header>())?;
            Header::read_from_prefix(&head).map_or(0, |(header, _)| header.length())
        };
        if (length as usize) < size_of::<Header>() {
            return Err(TableError::Truncated { length });
        }

        let region = Mapped::new(bridge, phys, length as usize)?;
        let (header, _) =
            Header::read_from_prefix(&region).map_err(|_| TableError::Truncated { length })?;
        log::trace!("{} @ {phys}, {length:#x} bytes", header.signature);
        Ok(Table { header, region })
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn signature(&self) -> Signature {
        self.header.signature
    }

    /// Number of mapped bytes, always the declared length.
    #[inline]
    pub fn len(&self) -> usize {
        self.region.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// All bytes of the table, header included.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.region
    }

    /// The bytes following the header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.region[size_of::<Header>()..]
    }

    /// Reads the table as a `T`.
    ///
    /// Returns `None` if the signature does not match or the table is shorter than `T`.
    pub fn read<T: Sdt>(&self) -> Option<T> {
        if self.signature() != T::SIGNATURE {
            return None;
        }
        T::read_from_prefix(self.bytes()).ok().map(|(table, _)| table)
    }
}

/// Root System Description Table
pub struct RootTable<B: Bridge> {
    table: Table<B>,
    bridge: B,
}

impl<B: Bridge> RootTable<B> {
    pub const SIGNATURE: Signature = Signature(*b"RSDT");

    /// Maps the root table named by `rsdp`.
    pub fn new(bridge: B, rsdp: &Rsdp) -> Result<RootTable<B>, TableError> {
        let table = Table::map(bridge, rsdp.rsdt_addr())?;
        if table.signature() != Self::SIGNATURE {
            log::warn!(
                "root table @ {} has signature {:?}",
                rsdp.rsdt_addr(),
                table.signature()
            );
        }
        Ok(RootTable { table, bridge })
    }

    #[inline]
    pub fn header(&self) -> &Header {
        self.table.header()
    }

    /// The 32-bit physical addresses following the header.
    ///
    /// A trailing partial entry is ignored.
    pub fn entries(&self) -> &[u32_le] {
        let payload = self.table.payload();
        let whole = payload.len() / size_of::<u32_le>() * size_of::<u32_le>();
        <[u32_le]>::ref_from_bytes(&payload[..whole]).unwrap_or(&[])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Maps each table listed in the root table, in entry order.
    ///
    /// Tables are mapped lazily as the iterator advances. An entry that cannot be mapped
    /// yields `None` and the walk continues with the next one.
    pub fn tables(&self) -> impl Iterator<Item = (PhysAddr, Option<Table<B>>)> + '_ {
        self.entries().iter().map(move |entry| {
            let phys = PhysAddr::new(entry.get());
            let table = Table::map(self.bridge, phys)
                .map_err(|err| log::debug!("skipping table @ {phys}: {err}"))
                .ok();
            (phys, table)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeMemory};

    fn rsdp_for(rsdt: u32) -> Rsdp {
        Rsdp::read_from_bytes(&testing::rsdp(rsdt)).unwrap()
    }

    #[test]
    fn maps_header_then_whole_table() {
        let mut mem = FakeMemory::new(0x2000);
        mem.write(0x1003, &testing::table(b"FACP", &[0xaa; 8]));

        let table = Table::map(&mem, PhysAddr::new(0x1003)).unwrap();
        assert_eq!(table.signature(), Signature(*b"FACP"));
        assert_eq!(table.len(), 44);
        assert_eq!(table.payload(), [0xaa; 8]);
        assert_eq!(mem.live(), 1);
        assert_eq!(
            *mem.maps.borrow(),
            [(PhysAddr::new(0x1003), 36), (PhysAddr::new(0x1003), 44)]
        );

        drop(table);
        assert_eq!(mem.live(), 0);
        assert_eq!(*mem.unmaps.borrow(), [36, 44]);
    }

    #[test]
    fn rejects_length_shorter_than_header() {
        let mut mem = FakeMemory::new(0x2000);
        mem.write(0x1000, &testing::table_with_length(b"FACP", 35, &[]));

        let err = Table::map(&mem, PhysAddr::new(0x1000)).err().unwrap();
        assert!(matches!(err, TableError::Truncated { length: 35 }));
        assert_eq!(mem.maps.borrow().len(), 1);
        assert_eq!(mem.live(), 0);
    }

    #[test]
    fn length_past_memory_fails_to_map() {
        let mut mem = FakeMemory::new(0x1100);
        mem.write(0x1000, &testing::table_with_length(b"FACP", 0x1000, &[]));

        let err = Table::map(&mem, PhysAddr::new(0x1000)).err().unwrap();
        assert!(matches!(err, TableError::Map(MapError { size: 0x1000, .. })));
        assert_eq!(mem.live(), 0);
    }

    #[test]
    fn read_checks_signature_and_size() {
        let mut mem = FakeMemory::new(0x2000);
        mem.write(0x1000, &testing::table(b"BOOT", &[0x32, 0, 0, 0]));
        mem.write(0x1100, &testing::table(b"BOOT", &[0x32]));
        mem.write(0x1200, &testing::table(b"FACP", &[0x32, 0, 0, 0]));

        let boot = Table::map(&mem, PhysAddr::new(0x1000)).unwrap();
        assert_eq!(boot.read::<BootTable>().unwrap().cmos_index(), 0x32);

        let short = Table::map(&mem, PhysAddr::new(0x1100)).unwrap();
        assert!(short.read::<BootTable>().is_none());

        let other = Table::map(&mem, PhysAddr::new(0x1200)).unwrap();
        assert!(other.read::<BootTable>().is_none());
    }

    #[test]
    fn enumerates_entries_in_order_skipping_failures() {
        let mut mem = FakeMemory::new(0x4000);
        mem.write(0x100, &testing::rsdt(&[0x1000, 0x2000, 0x3000]));
        mem.write(0x1000, &testing::table(b"FACP", &[]));
        mem.write(0x3000, &testing::table(b"BOOT", &[0x70, 0, 0, 0]));
        mem.hole(0x2000);

        let root = RootTable::new(&mem, &rsdp_for(0x100)).unwrap();
        assert_eq!(root.len(), 3);

        let found: Vec<_> = root
            .tables()
            .map(|(phys, table)| (phys.get(), table.map(|t| t.signature())))
            .collect();
        assert_eq!(
            found,
            [
                (0x1000, Some(Signature(*b"FACP"))),
                (0x2000, None),
                (0x3000, Some(Signature(*b"BOOT"))),
            ]
        );
        assert_eq!(mem.live(), 1);

        drop(root);
        assert_eq!(mem.live(), 0);
    }

    #[test]
    fn ignores_partial_trailing_entry() {
        let mut mem = FakeMemory::new(0x2000);
        let mut payload = 0x1000u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0xff, 0xff]);
        mem.write(0x100, &testing::table(b"RSDT", &payload));

        let root = RootTable::new(&mem, &rsdp_for(0x100)).unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root.entries()[0].get(), 0x1000);
    }

    #[test]
    fn signature_display_masks_unprintable_bytes() {
        assert_eq!(Signature(*b"BOOT").to_string(), "BOOT");
        assert_eq!(Signature([b'A', 0, 0xff, b'Z']).to_string(), "A??Z");
        assert_eq!(format!("{:?}", Signature(*b"RSDT")), "\"RSDT\"");
    }
}
