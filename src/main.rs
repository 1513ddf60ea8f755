use clap::{ArgAction, Parser};
use sbf::{
    cmos::{Nvram, DEV_NVRAM},
    logger::StderrLogger,
    mem::{DevMem, DEV_MEM},
    run::{run, Options},
};
use std::{error::Error as _, path::PathBuf, process::ExitCode};

/// Clear the Simple Boot Flag so the firmware skips a full POST on the next boot
#[derive(Parser, Debug)]
#[command(name = "sbf", version, about)]
struct Cli {
    /// Set the DIAG request flag
    #[arg(short = 'd', long = "diag")]
    diag: bool,

    /// Log more detail to stderr; repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Physical memory device
    #[arg(long, value_name = "PATH", default_value = DEV_MEM)]
    mem: PathBuf,

    /// CMOS NVRAM device
    #[arg(long, value_name = "PATH", default_value = DEV_NVRAM)]
    nvram: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(err) = StderrLogger::new(StderrLogger::level_for(cli.verbose)).init() {
        eprintln!("sbf: {err}");
    }

    match clear_boot_flag(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("sbf: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprint!(": {cause}");
                source = cause.source();
            }
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

fn clear_boot_flag(cli: &Cli) -> Result<(), sbf::Error> {
    let mem = DevMem::open(&cli.mem)?;
    let nvram = Nvram::new(&cli.nvram);
    let options = Options {
        set_diag: cli.diag,
        ..Options::default()
    };

    let report = run(&mem, &nvram, &options, |event| println!("{event}"))?;
    log::info!(
        "RSDP @ {}, {} tables mapped, {} boot flag(s) handled",
        report.rsdp,
        report.tables,
        report.updates.len()
    );
    Ok(())
}
