//! Simple Boot Flag register
//!
//! The boot flag is a single CMOS byte:
//!
//! ```text
//! bit 0     PNPOS    set once the OS has taken over
//! bit 1     BOOTING  set by firmware at the start of POST, cleared by the OS
//! bit 2     DIAG     request diagnostics on the next boot
//! bits 3-6  reserved, zero
//! bit 7     PARITY
//! ```
//!
//! A byte that does not look like this is left alone.

use crate::{ports::IoPorts, Error};
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::PathBuf,
    thread,
    time::Duration,
};

pub const DEV_NVRAM: &str = "/dev/nvram";

/// Values of a boot flag register that firmware never initialized.
pub const UNINITIALIZED: [u8; 2] = [0xff, 0xfd];

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct BootFlags : u8 {
        const PNPOS = 1 << 0;
        const BOOTING = 1 << 1;
        const DIAG = 1 << 2;
        const RESERVED = 0b0111_1000;
        const PARITY = 1 << 7;
    }
}

/// Returns the XOR of all bits of `value`, `0` for an even number of set bits.
#[inline]
pub const fn parity(value: u8) -> u32 {
    value.count_ones() & 1
}

/// Returns `true` if `value` is safe to update.
pub fn is_valid(value: u8) -> bool {
    if UNINITIALIZED.contains(&value) {
        return true;
    }
    let flags = BootFlags::from_bits_retain(value);
    !flags.intersects(BootFlags::RESERVED) && parity(value) == 0
}

/// Computes the value written back after a successful boot.
///
/// Clears BOOTING and DIAG, sets PNPOS, and sets DIAG again if `set_diag`. The reserved and
/// parity bits are carried over from `value` unchanged.
pub fn next_value(value: u8, set_diag: bool) -> u8 {
    let mut flags = BootFlags::from_bits_retain(value);
    flags.remove(BootFlags::BOOTING | BootFlags::DIAG);
    flags.insert(BootFlags::PNPOS);
    flags.set(BootFlags::DIAG, set_diag);
    flags.bits()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The register held an unrecognized value and was not written.
    Rejected { register: u8, value: u8 },
    /// The register was written. `after` is the value read back, if the read succeeded.
    Updated {
        register: u8,
        before: u8,
        written: u8,
        after: Option<u8>,
    },
}

/// Reads, validates and rewrites the boot flag held at offset `register` of `device`.
///
/// After writing, waits `settle` before reading the register once more for reporting.
pub fn update_register<D>(
    device: &mut D,
    register: u8,
    set_diag: bool,
    settle: Duration,
) -> Result<Outcome, Error>
where
    D: Read + Write + Seek,
{
    let cmos_io = |source: io::Error| Error::CmosIo { register, source };

    let before = read_register(device, register)
        .map_err(cmos_io)?
        .ok_or(Error::CmosUnreadable { register })?;

    if !is_valid(before) {
        log::warn!("CMOS {register:#x}: {before:#04x} is not a valid boot flag, not updating");
        return Ok(Outcome::Rejected {
            register,
            value: before,
        });
    }

    let written = next_value(before, set_diag);
    device
        .seek(SeekFrom::Start(register.into()))
        .map_err(cmos_io)?;
    device.write_all(&[written]).map_err(cmos_io)?;
    device.flush().map_err(cmos_io)?;
    log::debug!("CMOS {register:#x}: {before:#04x} -> {written:#04x}");

    if !settle.is_zero() {
        thread::sleep(settle);
    }

    let after = read_register(device, register).map_err(cmos_io)?;
    if after.is_none() {
        log::warn!("CMOS {register:#x}: cannot read back the updated value");
    }
    Ok(Outcome::Updated {
        register,
        before,
        written,
        after,
    })
}

fn read_register<D: Read + Seek>(device: &mut D, register: u8) -> io::Result<Option<u8>> {
    device.seek(SeekFrom::Start(register.into()))?;
    let mut value = [0u8];
    match device.read(&mut value)? {
        0 => Ok(None),
        _ => Ok(Some(value[0])),
    }
}

/// Access to the CMOS status register and the privilege its update needs.
pub trait Cmos {
    type Device: Read + Write + Seek;
    /// Held while the register is updated; dropping it gives up the privilege.
    type Privilege;

    fn acquire_ports(&self) -> Result<Self::Privilege, Error>;

    fn open(&self) -> Result<Self::Device, Error>;
}

/// The kernel's NVRAM device
#[derive(Clone, Debug)]
pub struct Nvram {
    path: PathBuf,
}

impl Nvram {
    pub fn new(path: impl Into<PathBuf>) -> Nvram {
        Nvram { path: path.into() }
    }
}

impl Cmos for Nvram {
    type Device = File;
    type Privilege = IoPorts;

    fn acquire_ports(&self) -> Result<IoPorts, Error> {
        IoPorts::acquire()
    }

    fn open(&self) -> Result<File, Error> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| Error::DeviceOpen {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn nvram_with(register: u8, value: u8) -> Cursor<Vec<u8>> {
        let mut image = vec![0u8; 0x80];
        image[usize::from(register)] = value;
        Cursor::new(image)
    }

    #[test]
    fn uninitialized_register_is_cleared() {
        assert!(is_valid(0xff));
        assert_eq!(next_value(0xff, false), 0xf9);

        let mut nvram = nvram_with(0x32, 0xff);
        let outcome = update_register(&mut nvram, 0x32, false, Duration::ZERO).unwrap();
        assert_eq!(
            outcome,
            Outcome::Updated {
                register: 0x32,
                before: 0xff,
                written: 0xf9,
                after: Some(0xf9),
            }
        );
        assert_eq!(nvram.get_ref()[0x32], 0xf9);
    }

    #[test]
    fn diag_request_is_cleared() {
        assert!(is_valid(0x05));
        let mut nvram = nvram_with(0x40, 0x05);
        let outcome = update_register(&mut nvram, 0x40, false, Duration::ZERO).unwrap();
        assert!(matches!(outcome, Outcome::Updated { written: 0x01, after: Some(0x01), .. }));
    }

    #[test]
    fn diag_is_set_on_request() {
        let mut nvram = nvram_with(0x40, 0x03);
        let outcome = update_register(&mut nvram, 0x40, true, Duration::ZERO).unwrap();
        assert!(matches!(outcome, Outcome::Updated { before: 0x03, written: 0x05, .. }));
    }

    #[test]
    fn reserved_bits_block_the_write() {
        assert!(!is_valid(0x08));
        let mut nvram = nvram_with(0x32, 0x08);
        let outcome = update_register(&mut nvram, 0x32, false, Duration::ZERO).unwrap();
        assert_eq!(
            outcome,
            Outcome::Rejected {
                register: 0x32,
                value: 0x08
            }
        );
        assert_eq!(nvram.get_ref()[0x32], 0x08);
    }

    #[test]
    fn odd_parity_blocks_the_write() {
        assert!(!is_valid(0x01));
        let mut nvram = nvram_with(0x32, 0x01);
        let outcome = update_register(&mut nvram, 0x32, false, Duration::ZERO).unwrap();
        assert!(matches!(outcome, Outcome::Rejected { value: 0x01, .. }));
    }

    #[test]
    fn register_past_the_device_is_unreadable() {
        let mut nvram = Cursor::new(vec![0u8; 0x10]);
        let err = update_register(&mut nvram, 0x32, false, Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::CmosUnreadable { register: 0x32 }));
        assert_eq!(nvram.get_ref().len(), 0x10);
    }

    #[test]
    fn missing_nvram_device_fails_to_open() {
        let err = Nvram::new("/nonexistent/nvram").open().unwrap_err();
        assert!(matches!(err, Error::DeviceOpen { .. }));
    }
}
