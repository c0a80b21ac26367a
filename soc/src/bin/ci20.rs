use soc_lib::board::{Ci20, Ci20Config, Jz4780Config};
use soc_lib::clock::NS_PER_MS;

use std::path::PathBuf;

use clap::Parser;
use log::info;

/// MIPS Creator CI20 (Ingenic JZ4780) board
#[derive(Parser)]
#[command(about)]
struct Args {
    /// ELF kernel image
    kernel: Option<PathBuf>,

    /// DDR size in MiB
    #[arg(long, default_value_t = 1024)]
    ddr_mib: u64,

    /// CPU model
    #[arg(long, default_value = "xburst-jz4780")]
    cpu: String,

    /// Number of CPUs
    #[arg(long, default_value_t = 1)]
    smp: usize,

    /// Milliseconds of virtual time to run the devices for
    #[arg(long, default_value_t = 10)]
    run_ms: u64,
}

fn main() {
    env_logger::init();

    let opt = Args::parse();
    let config = Ci20Config {
        soc: Jz4780Config {
            ddr_size: opt.ddr_mib << 20,
            cpu_model: opt.cpu,
            smp_cpus: opt.smp,
        },
        kernel: opt.kernel,
    };

    let board = match Ci20::new(&config) {
        Ok(board) => board,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let fired = board.run_for(opt.run_ms.saturating_mul(NS_PER_MS));
    let soc = board.soc();
    let tcu = soc.tcu();
    info!("ran {} ms of virtual time, {fired} timer callbacks", opt.run_ms);

    println!("entry:    {:#010x}", board.kernel_entry());
    for cpu in soc.cpus() {
        println!("cpu{}:     pc={:#010x} status={:#010x}", cpu.index(), cpu.pc(), cpu.cp0_status());
    }
    println!(
        "tcu:      enable={:#010x} flag={:#010x} mask={:#010x} stop={:#010x}",
        tcu.enable(),
        tcu.flag(),
        tcu.mask(),
        tcu.stop()
    );
    for bank in 0..soc.intc().num_banks() {
        let (Ok(source), Ok(mask), Ok(pending)) = (
            soc.intc().read_source(bank),
            soc.intc().read_mask(bank),
            soc.intc().read_pending(bank),
        ) else {
            continue;
        };
        println!("intc[{bank}]:  source={source:#010x} mask={mask:#010x} pending={pending:#010x}");
    }
}
