//! Finding the boot flag and clearing it

use crate::{
    cmos::{self, Cmos, Outcome},
    find_rsdp,
    sdt::{BootTable, Bridge, RootTable, Sdt, Signature},
    Error, PhysAddr, BIOS_ROM_BASE, BIOS_ROM_SIZE,
};
use core::fmt;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Options {
    /// Request diagnostics on the next boot.
    pub set_diag: bool,
    pub scan_base: PhysAddr,
    pub scan_size: usize,
    /// Pause between writing the register and reading it back.
    pub settle: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            set_diag: false,
            scan_base: BIOS_ROM_BASE,
            scan_size: BIOS_ROM_SIZE,
            settle: Duration::from_secs(1),
        }
    }
}

/// Progress worth telling the user about, in the order it happens.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    SetDiag,
    TableFound { signature: Signature, addr: PhysAddr },
    CmosRegister(u8),
    CurrentValue(u8),
    Rejected(u8),
    UpdatedValue(u8),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetDiag => f.write_str("will set DIAG"),
            Self::TableFound { signature, addr } => write!(f, "{signature} @ {addr}"),
            Self::CmosRegister(register) => write!(f, "CMOS register: {register:#x}"),
            Self::CurrentValue(value) => write!(f, "Read current value := {value:#x}"),
            Self::Rejected(value) => write!(f, "Not a valid boot flag, left unchanged := {value:#x}"),
            Self::UpdatedValue(value) => write!(f, "Read updated value := {value:#x}"),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Report {
    pub rsdp: PhysAddr,
    /// Number of root table entries that could be mapped.
    pub tables: usize,
    pub updates: Vec<Outcome>,
}

/// Walks the ACPI tables and updates the boot flag named by each `BOOT` table.
///
/// Every root table entry is visited, including those after a `BOOT` table. Entries that
/// cannot be mapped are skipped. Failing to find or map the root table, to gain port
/// access, or to read the register ends the run with an error.
pub fn run<B, C>(
    bridge: B,
    cmos: &C,
    options: &Options,
    mut emit: impl FnMut(Event),
) -> Result<Report, Error>
where
    B: Bridge,
    C: Cmos,
{
    if options.set_diag {
        emit(Event::SetDiag);
    }

    let (rsdp_addr, rsdp) = find_rsdp(bridge, options.scan_base, options.scan_size).ok_or(
        Error::RootPointerNotFound {
            base: options.scan_base,
            size: options.scan_size,
        },
    )?;
    let root = RootTable::new(bridge, &rsdp).map_err(|source| Error::RootTable {
        addr: rsdp.rsdt_addr(),
        source,
    })?;
    log::debug!(
        "RSDT @ {} revision {} lists {} tables",
        rsdp.rsdt_addr(),
        root.header().revision,
        root.len()
    );

    let mut report = Report {
        rsdp: rsdp_addr,
        ..Report::default()
    };
    for (addr, table) in root.tables() {
        let Some(table) = table else { continue };
        report.tables += 1;
        log::debug!("{} @ {addr}", table.signature());
        if table.signature() != BootTable::SIGNATURE {
            continue;
        }

        emit(Event::TableFound {
            signature: table.signature(),
            addr,
        });
        let Some(boot) = table.read::<BootTable>() else {
            log::warn!("BOOT @ {addr} is only {} bytes long, skipping", table.len());
            continue;
        };
        log::info!(
            "BOOT @ {addr} from {:?} names CMOS register {:#x}",
            String::from_utf8_lossy(&boot.header().oem_id),
            boot.cmos_index()
        );

        let outcome = update_boot_flag(cmos, boot.cmos_index(), options, &mut emit)?;
        report.updates.push(outcome);
    }
    Ok(report)
}

fn update_boot_flag<C: Cmos>(
    cmos: &C,
    register: u8,
    options: &Options,
    emit: &mut impl FnMut(Event),
) -> Result<Outcome, Error> {
    let _privilege = cmos.acquire_ports()?;
    emit(Event::CmosRegister(register));

    let mut device = cmos.open()?;
    let outcome = cmos::update_register(&mut device, register, options.set_diag, options.settle)?;
    match outcome {
        Outcome::Rejected { value, .. } => {
            emit(Event::CurrentValue(value));
            emit(Event::Rejected(value));
        }
        Outcome::Updated { before, after, .. } => {
            emit(Event::CurrentValue(before));
            if let Some(after) = after {
                emit(Event::UpdatedValue(after));
            }
        }
    }
    Ok(outcome)
}
