pub mod board;
pub mod bus;
pub mod clock;
pub mod io;
pub mod irq;

pub use board::{BoardError, Ci20, Ci20Config, Jz4780, Jz4780Config, MipsCpu};
pub use bus::{Bus, BusError};
pub use clock::VirtualClock;
pub use io::MmioHandler;
pub use irq::{IrqHandler, IrqLevels, IrqLine};
