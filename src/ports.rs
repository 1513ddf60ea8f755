//! # x86 I/O Port Permissions
//!
//! Writing the CMOS status byte goes through the RTC index/data pair at `0x70`/`0x71`, and
//! the kernel driver touches the POST diagnostic port at `0x80` while doing so. A user
//! process needs `ioperm` access to both windows for the duration of the write.
//!
//! ```text
//! 0x0070-0x0071   CMOS/RTC index and data
//! 0x0080          POST diagnostic
//! ```

use crate::Error;
use std::io;

pub const POST_PORT: u16 = 0x80;
pub const RTC_PORT: u16 = 0x70;

/// Access to `num` consecutive ports starting at `from`, revoked on drop.
#[derive(Debug)]
pub struct PortWindow {
    from: u16,
    num: u16,
}

impl PortWindow {
    pub fn acquire(from: u16, num: u16) -> Result<PortWindow, Error> {
        ioperm(from, num, true).map_err(|source| match source.kind() {
            io::ErrorKind::Unsupported => Error::Unsupported,
            _ => Error::Privilege { port: from, source },
        })?;
        log::trace!("ioperm {from:#x}+{num} granted");
        Ok(PortWindow { from, num })
    }
}

impl Drop for PortWindow {
    fn drop(&mut self) {
        if let Err(err) = ioperm(self.from, self.num, false) {
            log::warn!("cannot release I/O port {:#x}: {err}", self.from);
        }
    }
}

/// Both port windows needed to update the CMOS status byte.
///
/// The RTC window is released before the POST port, the reverse of acquisition.
#[derive(Debug)]
pub struct IoPorts {
    _rtc: PortWindow,
    _post: PortWindow,
}

impl IoPorts {
    pub fn acquire() -> Result<IoPorts, Error> {
        let post = PortWindow::acquire(POST_PORT, 1)?;
        let rtc = PortWindow::acquire(RTC_PORT, 2)?;
        Ok(IoPorts {
            _rtc: rtc,
            _post: post,
        })
    }
}

#[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
fn ioperm(from: u16, num: u16, on: bool) -> io::Result<()> {
    extern "C" {
        fn ioperm(from: libc::c_ulong, num: libc::c_ulong, turn_on: libc::c_int) -> libc::c_int;
    }

    // SAFETY: changes the permission bitmap of the calling thread only.
    let ret = unsafe { ioperm(from.into(), num.into(), on.into()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64"))))]
fn ioperm(_from: u16, _num: u16, _on: bool) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}
