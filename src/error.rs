use crate::{sdt::TableError, PhysAddr};
use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot open {}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no ACPI root pointer in {size:#x} bytes at {base}")]
    RootPointerNotFound { base: PhysAddr, size: usize },
    #[error("cannot map the RSDT @ {addr}")]
    RootTable {
        addr: PhysAddr,
        #[source]
        source: TableError,
    },
    #[error("cannot acquire I/O port {port:#x}")]
    Privilege {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("I/O port access is not supported on this platform")]
    Unsupported,
    #[error("can't read from CMOS offset {register:#x}")]
    CmosUnreadable { register: u8 },
    #[error("CMOS access at offset {register:#x} failed")]
    CmosIo {
        register: u8,
        #[source]
        source: io::Error,
    },
}
