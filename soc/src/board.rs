use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::constants::*;
use elf::{Elf, ElfError};

use crate::bus::{Bus, BusError};
use crate::clock::VirtualClock;
use crate::io::cgu::Cgu;
use crate::io::intc::{Intc, IntcError};
use crate::io::tcu::{Tcu, TcuError};
use crate::irq::{IrqLevels, IrqLine};

use log::{debug, info};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("No kernel provided")]
    NoKernel,
    #[error("Unable to find CPU definition {0:?}")]
    UnknownCpu(String),
    #[error("At least one CPU is required")]
    NoCpus,
    #[error("{requested} CPUs requested, the board supports at most {max}")]
    TooManyCpus { requested: usize, max: usize },
    #[error("{ddr_size:#x} bytes of DDR requested, at most {max:#x} can be mapped")]
    DdrTooLarge { ddr_size: u64, max: u64 },
    #[error("No UART{0}")]
    NoSuchUart(usize),
    #[error("could not load kernel '{path}': {source}")]
    KernelLoad {
        path: String,
        #[source]
        source: KernelError,
    },
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Intc(#[from] IntcError),
    #[error(transparent)]
    Tcu(#[from] TcuError),
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Elf(#[from] ElfError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuModel {
    XburstJz4780,
}

impl CpuModel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "xburst-jz4780" => Some(CpuModel::XburstJz4780),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CpuModel::XburstJz4780 => "xburst-jz4780",
        }
    }
}

/// The parts of a MIPS CPU the board touches: its reset state and its
/// interrupt pins. Instruction execution lives elsewhere.
pub struct MipsCpu {
    index: usize,
    model: CpuModel,
    pc: u32,
    cp0_status: u32,
    pins: Arc<IrqLevels>,
}

impl MipsCpu {
    pub const CP0ST_ERL: u32 = 1 << 2;
    pub const CP0ST_BEV: u32 = 1 << 22;
    pub const NUM_IRQS: usize = 8;

    pub fn new(index: usize, model: CpuModel) -> Self {
        let mut cpu = MipsCpu {
            index,
            model,
            pc: 0,
            cp0_status: 0,
            pins: IrqLevels::new(),
        };
        cpu.arch_reset();
        cpu
    }

    // Architectural reset: boot exception vectors, error level.
    fn arch_reset(&mut self) {
        self.cp0_status = Self::CP0ST_BEV | Self::CP0ST_ERL;
        self.pc = MIPS_BOOT_VECTOR;
    }

    /// Board reset: the SoC leaves the CPU running from normal vectors at
    /// `CPU_RESET_PC`.
    pub fn reset(&mut self) {
        self.arch_reset();
        self.cp0_status &= !(Self::CP0ST_BEV | Self::CP0ST_ERL);
        self.pc = CPU_RESET_PC;
    }

    /// Hardware interrupt pin `n` (0-7).
    pub fn irq(&self, n: usize) -> IrqLine {
        assert!(n < Self::NUM_IRQS, "MIPS CPUs have no interrupt {n}");
        self.pins.line(n)
    }

    pub fn irq_level(&self, n: usize) -> bool {
        self.pins.level(n)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn model(&self) -> CpuModel {
        self.model
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    pub fn cp0_status(&self) -> u32 {
        self.cp0_status
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct Jz4780Config {
    pub ddr_size: u64,
    pub cpu_model: String,
    pub smp_cpus: usize,
}

impl Default for Jz4780Config {
    fn default() -> Self {
        Jz4780Config {
            ddr_size: DEFAULT_DDR_SIZE,
            cpu_model: CpuModel::XburstJz4780.name().to_string(),
            smp_cpus: 1,
        }
    }
}

pub struct Jz4780 {
    clock: Arc<VirtualClock>,
    bus: Bus,
    cpus: Vec<MipsCpu>,
    cgu: Arc<Cgu>,
    intc: Arc<Intc>,
    tcu: Arc<Tcu>,
}

impl Jz4780 {
    pub fn new(config: &Jz4780Config) -> Result<Self, BoardError> {
        let model = CpuModel::from_name(&config.cpu_model)
            .ok_or_else(|| BoardError::UnknownCpu(config.cpu_model.clone()))?;
        match config.smp_cpus {
            0 => return Err(BoardError::NoCpus),
            n if n > MAX_CPUS => {
                return Err(BoardError::TooManyCpus {
                    requested: n,
                    max: MAX_CPUS,
                });
            }
            _ => (),
        }
        let cpus: Vec<_> = (0..config.smp_cpus).map(|i| MipsCpu::new(i, model)).collect();

        let ddr_low_size = config.ddr_size.min(DDR_LOW_MAX);
        let ddr_high_size = config.ddr_size - ddr_low_size;
        if ddr_high_size > DDR_HIGH_MAX {
            return Err(BoardError::DdrTooLarge {
                ddr_size: config.ddr_size,
                max: DDR_LOW_MAX + DDR_HIGH_MAX,
            });
        }

        let mut bus = Bus::new();
        bus.add_ram("ddr-low.ram", DDR_LOW_BASE, ddr_low_size)?;
        if ddr_high_size != 0 {
            bus.add_ram("ddr-high.ram", DDR_HIGH_BASE, ddr_high_size)?;
        }

        let clock = Arc::new(VirtualClock::new());

        let cgu = Arc::new(Cgu::new());
        bus.map_device(CGU_BASE, cgu.clone())?;

        let intc = Intc::new(INTC_NUM_BANKS, cpus[0].irq(CPU_INTC_IRQ))?;
        bus.map_device(INTC_BASE, intc.clone())?;

        let tcu_irqs = [intc.irq(INTC_TCU0)?, intc.irq(INTC_TCU1)?, intc.irq(INTC_TCU2)?];
        let tcu = Tcu::new(&clock, tcu_irqs)?;
        bus.map_device(TCU_BASE, tcu.clone())?;

        debug!("jz4780: {} x {}, {:#x} bytes DDR", cpus.len(), model.name(), config.ddr_size);

        Ok(Jz4780 {
            clock,
            bus,
            cpus,
            cgu,
            intc,
            tcu,
        })
    }

    /// The line an external device drives to request INTC source `n`.
    pub fn irq(&self, n: usize) -> Result<IrqLine, BoardError> {
        Ok(self.intc.irq(n)?)
    }

    pub fn uart_irq(&self, uart: usize) -> Result<IrqLine, BoardError> {
        let n = INTC_UARTS.get(uart).ok_or(BoardError::NoSuchUart(uart))?;
        self.irq(*n)
    }

    pub fn uart_base(uart: usize) -> Option<u64> {
        (uart < NUM_UARTS).then(|| UART_BASE + UART_STRIDE * uart as u64)
    }

    pub fn reset(&mut self) {
        self.bus.reset();
        for cpu in &mut self.cpus {
            cpu.reset();
        }
    }

    /// Advances virtual time, running any device timers that come due.
    pub fn run_for(&self, ns: u64) -> usize {
        self.clock.advance(ns)
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn cpus(&self) -> &[MipsCpu] {
        &self.cpus
    }

    pub fn cpus_mut(&mut self) -> &mut [MipsCpu] {
        &mut self.cpus
    }

    pub fn cgu(&self) -> &Arc<Cgu> {
        &self.cgu
    }

    pub fn intc(&self) -> &Arc<Intc> {
        &self.intc
    }

    pub fn tcu(&self) -> &Arc<Tcu> {
        &self.tcu
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Default)]
pub struct Ci20Config {
    pub soc: Jz4780Config,
    pub kernel: Option<PathBuf>,
}

/// MIPS Creator CI20: a JZ4780 with an ELF kernel loaded into DDR. After
/// reset CPU 0 starts at the kernel's entry point.
pub struct Ci20 {
    soc: Jz4780,
    kernel_entry: u32,
}

impl Ci20 {
    pub fn new(config: &Ci20Config) -> Result<Self, BoardError> {
        let Some(kernel) = &config.kernel else {
            return Err(BoardError::NoKernel);
        };

        let mut soc = Jz4780::new(&config.soc)?;
        let kernel_entry =
            load_kernel(soc.bus_mut(), kernel).map_err(|source| BoardError::KernelLoad {
                path: kernel.display().to_string(),
                source,
            })?;
        info!("ci20: loaded {}, entry {kernel_entry:#x}", kernel.display());

        let mut board = Ci20 { soc, kernel_entry };
        board.reset();
        Ok(board)
    }

    pub fn reset(&mut self) {
        self.soc.reset();
        self.soc.cpus[0].set_pc(self.kernel_entry);
    }

    pub fn run_for(&self, ns: u64) -> usize {
        self.soc.run_for(ns)
    }

    pub fn kernel_entry(&self) -> u32 {
        self.kernel_entry
    }

    pub fn soc(&self) -> &Jz4780 {
        &self.soc
    }

    pub fn soc_mut(&mut self) -> &mut Jz4780 {
        &mut self.soc
    }
}

pub fn kseg0_to_phys(addr: u32) -> u32 {
    addr & KSEG_PHYS_MASK
}

pub fn load_kernel(bus: &mut Bus, path: &Path) -> Result<u32, KernelError> {
    let image = fs::read(path)?;
    load_elf(bus, &image)
}

/// Loads every PT_LOAD segment at its physical address, zero filling past the
/// file data, and returns the entry point.
pub fn load_elf(bus: &mut Bus, image: &[u8]) -> Result<u32, KernelError> {
    let elf = Elf::parse(image)?;
    for seg in &elf.segments {
        let phys = kseg0_to_phys(seg.paddr) as u64;
        let file_size = seg.data.len() as u64;
        debug!("kernel: segment {:#x} -> {phys:#x}, {:#x} bytes", seg.paddr, seg.mem_size);
        bus.load(phys, &seg.data)?;
        bus.fill(phys + file_size, seg.mem_size as u64 - file_size, 0)?;
    }
    Ok(elf.entry)
}
