// Physical memory map of the JZ4780 as wired on the CI20.

pub const DDR_LOW_BASE: u64 = 0x0000_0000;
pub const DDR_LOW_MAX: u64 = 256 << 20;
pub const DDR_HIGH_BASE: u64 = 0x3000_0000;
pub const DDR_HIGH_MAX: u64 = 768 << 20;
pub const DEFAULT_DDR_SIZE: u64 = 1 << 30;

pub const CGU_BASE: u64 = 0x1000_0000;
pub const CGU_SIZE: u64 = 0x100;

pub const INTC_BASE: u64 = 0x1000_1000;
pub const INTC_BANK_STRIDE: u64 = 0x20;
pub const INTC_NUM_BANKS: usize = 2;
pub const INTC_SOURCES_PER_BANK: usize = 32;

pub const TCU_BASE: u64 = 0x1000_2000;
pub const TCU_SIZE: u64 = 0x200;

pub const UART_BASE: u64 = 0x1003_0000;
pub const UART_STRIDE: u64 = 0x1000;
pub const NUM_UARTS: usize = 5;

// INTC source numbers.
pub const INTC_TCU2: usize = 25;
pub const INTC_TCU1: usize = 26;
pub const INTC_TCU0: usize = 27;
pub const INTC_UART4: usize = 34;
pub const INTC_UART3: usize = 48;
pub const INTC_UART2: usize = 49;
pub const INTC_UART1: usize = 50;
pub const INTC_UART0: usize = 51;

pub const INTC_UARTS: [usize; NUM_UARTS] = [
    INTC_UART0, INTC_UART1, INTC_UART2, INTC_UART3, INTC_UART4,
];

// CPU hardware interrupt the INTC output is wired to.
pub const CPU_INTC_IRQ: usize = 2;

pub const MAX_CPUS: usize = 2;

// Where the CPU starts after an architectural reset, and where the board
// reset handler sends it afterwards.
pub const MIPS_BOOT_VECTOR: u32 = 0xbfc0_0000;
pub const CPU_RESET_PC: u32 = 0xf000_0000;

pub const KSEG_PHYS_MASK: u32 = 0x1fff_ffff;
