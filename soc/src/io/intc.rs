use std::collections::TryReserveError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use common::constants::{INTC_BANK_STRIDE, INTC_SOURCES_PER_BANK};
use common::mem::AccessSize;
use common::misc::Bit;

use crate::io::MmioHandler;
use crate::irq::{IrqHandler, IrqLine};

use log::{error, trace, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntcError {
    #[error("interrupt controller needs at least one bank")]
    NoBanks,
    #[error("unable to allocate {0} interrupt banks")]
    Alloc(usize, #[source] TryReserveError),
    #[error("invalid bank {0}")]
    InvalidBank(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
enum IntcReg {
    Source = 0x00,
    Mask = 0x04,
    MaskSet = 0x08,
    MaskClear = 0x0c,
    Pending = 0x10,
}

struct Bank {
    source: AtomicU32,
    mask: AtomicU32, // 1 = masked
    pending: AtomicU32,
    out_irq: Option<IrqLine>,
}

impl Bank {
    fn new(out_irq: Option<IrqLine>) -> Self {
        Bank {
            source: AtomicU32::new(0),
            mask: AtomicU32::new(!0),
            pending: AtomicU32::new(0),
            out_irq,
        }
    }
}

/// JZ47xx interrupt controller: banks of 32 level-triggered sources, each
/// with a mask. The output line is high while any bank has an unmasked
/// source asserted.
pub struct Intc {
    banks: Vec<Bank>,
    out_irq: IrqLine,
}

impl Intc {
    pub fn new(num_banks: usize, out_irq: IrqLine) -> Result<Arc<Self>, IntcError> {
        Self::build(num_banks, out_irq, std::iter::repeat_with(|| None))
    }

    /// Like `new`, but also drives one line per bank from that bank alone.
    pub fn with_bank_lines(out_irq: IrqLine, bank_lines: Vec<IrqLine>) -> Result<Arc<Self>, IntcError> {
        Self::build(bank_lines.len(), out_irq, bank_lines.into_iter().map(Some))
    }

    fn build(
        num_banks: usize,
        out_irq: IrqLine,
        bank_lines: impl Iterator<Item = Option<IrqLine>>,
    ) -> Result<Arc<Self>, IntcError> {
        if num_banks == 0 {
            return Err(IntcError::NoBanks);
        }

        let mut banks = Vec::new();
        banks
            .try_reserve_exact(num_banks)
            .map_err(|e| IntcError::Alloc(num_banks, e))?;
        banks.extend(bank_lines.take(num_banks).map(Bank::new));

        let intc = Arc::new(Intc { banks, out_irq });
        intc.update();
        Ok(intc)
    }

    pub fn num_banks(&self) -> usize {
        self.banks.len()
    }

    fn bank(&self, idx: usize) -> Result<&Bank, IntcError> {
        self.banks.get(idx).ok_or(IntcError::InvalidBank(idx))
    }

    /// The input upstream devices drive to request source `n`.
    pub fn irq(self: &Arc<Self>, n: usize) -> Result<IrqLine, IntcError> {
        self.bank(n / INTC_SOURCES_PER_BANK)?;
        Ok(IrqLine::new(self.clone(), n))
    }

    pub fn request(&self, n: usize, level: bool) -> Result<(), IntcError> {
        let bank = self.bank(n / INTC_SOURCES_PER_BANK)?;
        let bit = u32::bit(n % INTC_SOURCES_PER_BANK);

        if level {
            bank.source.fetch_or(bit, Ordering::SeqCst);
        } else {
            bank.source.fetch_and(!bit, Ordering::SeqCst);
        }

        self.update();
        Ok(())
    }

    pub fn read_source(&self, bank: usize) -> Result<u32, IntcError> {
        Ok(self.bank(bank)?.source.load(Ordering::SeqCst))
    }

    pub fn read_mask(&self, bank: usize) -> Result<u32, IntcError> {
        Ok(self.bank(bank)?.mask.load(Ordering::SeqCst))
    }

    pub fn read_pending(&self, bank: usize) -> Result<u32, IntcError> {
        Ok(self.bank(bank)?.pending.load(Ordering::SeqCst))
    }

    pub fn write_mask(&self, bank: usize, val: u32) -> Result<(), IntcError> {
        self.bank(bank)?.mask.store(val, Ordering::SeqCst);
        self.update();
        Ok(())
    }

    pub fn set_mask(&self, bank: usize, bits: u32) -> Result<(), IntcError> {
        self.bank(bank)?.mask.fetch_or(bits, Ordering::SeqCst);
        self.update();
        Ok(())
    }

    pub fn clear_mask(&self, bank: usize, bits: u32) -> Result<(), IntcError> {
        self.bank(bank)?.mask.fetch_and(!bits, Ordering::SeqCst);
        self.update();
        Ok(())
    }

    // Recompute every bank's pending word and drive the outputs from it.
    fn update(&self) {
        let mut any_pending = 0;
        for bank in &self.banks {
            let pending = bank.source.load(Ordering::SeqCst) & !bank.mask.load(Ordering::SeqCst);
            bank.pending.store(pending, Ordering::SeqCst);
            if let Some(line) = &bank.out_irq {
                line.set(pending != 0);
            }
            any_pending |= pending;
        }
        self.out_irq.set(any_pending != 0);
    }

    fn decode(offset: u64) -> (usize, u64) {
        ((offset / INTC_BANK_STRIDE) as usize, offset % INTC_BANK_STRIDE)
    }
}

impl IrqHandler for Intc {
    fn set_irq(&self, n: usize, level: bool) {
        if let Err(e) = self.request(n, level) {
            error!("intc: request of source {n}: {e}");
        }
    }
}

impl MmioHandler for Intc {
    fn name(&self) -> &str {
        "jz47xx-intc"
    }

    fn size(&self) -> u64 {
        self.banks.len() as u64 * INTC_BANK_STRIDE
    }

    // Sources follow the upstream lines, which keep their levels across reset.
    fn reset(&self) {
        for bank in &self.banks {
            bank.mask.store(!0, Ordering::SeqCst);
        }
        self.update();
    }

    fn read(&self, offset: u64, _size: AccessSize) -> u64 {
        let (bank_idx, reg) = Self::decode(offset);
        let bank = match self.bank(bank_idx) {
            Ok(bank) => bank,
            Err(e) => {
                warn!("intc: read of {offset:#x}: {e}");
                return 0;
            }
        };

        let val = match IntcReg::from_u64(reg) {
            Some(IntcReg::Source) => bank.source.load(Ordering::SeqCst),
            Some(IntcReg::Mask) => bank.mask.load(Ordering::SeqCst),
            Some(IntcReg::MaskSet | IntcReg::MaskClear) => 0,
            Some(IntcReg::Pending) => bank.pending.load(Ordering::SeqCst),
            None => {
                warn!("intc: unhandled register {reg:#x}");
                0
            }
        };
        trace!("intc: read {offset:#x} -> {val:#x}");
        val as u64
    }

    fn write(&self, offset: u64, _size: AccessSize, val: u64) {
        let (bank_idx, reg) = Self::decode(offset);
        if let Err(e) = self.bank(bank_idx) {
            warn!("intc: write of {val:#x} to {offset:#x}: {e}");
            return;
        }
        trace!("intc: write {offset:#x} <- {val:#x}");

        let val = val as u32;
        let res = match IntcReg::from_u64(reg) {
            // Read only.
            Some(IntcReg::Source | IntcReg::Pending) => Ok(()),
            Some(IntcReg::Mask) => self.write_mask(bank_idx, val),
            Some(IntcReg::MaskSet) => self.set_mask(bank_idx, val),
            Some(IntcReg::MaskClear) => self.clear_mask(bank_idx, val),
            None => {
                warn!("intc: unhandled register {reg:#x}");
                Ok(())
            }
        };
        if let Err(e) = res {
            warn!("intc: write of {val:#x} to {offset:#x}: {e}");
        }
    }
}
