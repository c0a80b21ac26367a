use std::collections::TryReserveError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use common::constants::TCU_SIZE;
use common::mem::AccessSize;
use common::misc::Bit;

use crate::clock::{NS_PER_MS, NS_PER_US, TimerCallback, TimerId, VirtualClock};
use crate::io::MmioHandler;
use crate::irq::IrqLine;

use log::{trace, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use thiserror::Error;

pub const NUM_TIMER_CHANNELS: usize = 8;
pub const OST_CHANNEL: usize = 15;
pub const NUM_IRQS: usize = 3;

// Timer channels 0-7, then the OS timer.
const CHANNELS: [usize; NUM_TIMER_CHANNELS + 1] = [0, 1, 2, 3, 4, 5, 6, 7, OST_CHANNEL];

pub const FIRST_TICK_NS: u64 = NS_PER_US;
pub const TICK_PERIOD_NS: u64 = NS_PER_MS;
pub const TICK_INCREMENT: u32 = 10_000;

const HALF_FLAG_SHIFT: usize = 16;
const DATA_MASK: u32 = 0xffff;
const RESET_HALF: u32 = 0x7fff;
const RESET_FULL: u32 = 0xffff;

// Flag bits that drive each output line: the OS timer, timer 5, and
// timers 0-4,6,7.
const IRQ_FLAG_MASKS: [u32; NUM_IRQS] = [0x0000_8000, 0x0020_0020, 0x00df_00df];

const CHANNEL_BASE: u64 = 0x40;
const CHANNEL_STRIDE: u64 = 0x10;
const CHANNEL_END: u64 = CHANNEL_BASE + CHANNEL_STRIDE * NUM_TIMER_CHANNELS as u64;

#[derive(Debug, Error)]
pub enum TcuError {
    #[error("unable to allocate TCU channels")]
    Alloc(#[source] TryReserveError),
    #[error("invalid channel {0}")]
    InvalidChannel(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
enum TcuReg {
    Enable = 0x10,
    EnableSet = 0x14,
    EnableClear = 0x18,
    Stop = 0x1c,
    Flag = 0x20,
    FlagSet = 0x24,
    FlagClear = 0x28,
    StopSet = 0x2c,
    Mask = 0x30,
    MaskSet = 0x34,
    MaskClear = 0x38,
    StopClear = 0x3c,
}

impl TcuReg {
    fn target(self) -> (Bitset, BitOp) {
        match self {
            TcuReg::Enable => (Bitset::Enable, BitOp::Write),
            TcuReg::EnableSet => (Bitset::Enable, BitOp::Set),
            TcuReg::EnableClear => (Bitset::Enable, BitOp::Clear),
            TcuReg::Stop => (Bitset::Stop, BitOp::Write),
            TcuReg::StopSet => (Bitset::Stop, BitOp::Set),
            TcuReg::StopClear => (Bitset::Stop, BitOp::Clear),
            TcuReg::Flag => (Bitset::Flag, BitOp::Write),
            TcuReg::FlagSet => (Bitset::Flag, BitOp::Set),
            TcuReg::FlagClear => (Bitset::Flag, BitOp::Clear),
            TcuReg::Mask => (Bitset::Mask, BitOp::Write),
            TcuReg::MaskSet => (Bitset::Mask, BitOp::Set),
            TcuReg::MaskClear => (Bitset::Mask, BitOp::Clear),
        }
    }
}

/// Per-channel registers, relative to the channel's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ChannelReg {
    Full = 0x0,
    Half = 0x4,
    Count = 0x8,
    Ctrl = 0xc,
}

/// The TCU-wide bit registers. Bit `n` belongs to channel `n`; in `Flag`,
/// bit `16 + n` is channel `n`'s half flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitset {
    Enable,
    Stop,
    Mask,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    Write,
    Set,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub full: u32,
    pub half: u32,
    pub count: u32,
    pub ctrl: u32,
}

struct Channel {
    idx: usize,
    full: AtomicU32,
    half: AtomicU32,
    count: AtomicU32,
    ctrl: AtomicU32,
    timer: TimerId,
}

impl Channel {
    fn new(idx: usize, timer: TimerId) -> Self {
        Channel {
            idx,
            full: AtomicU32::new(RESET_FULL),
            half: AtomicU32::new(RESET_HALF),
            count: AtomicU32::new(0),
            ctrl: AtomicU32::new(0),
            timer,
        }
    }

    fn reset(&self) {
        self.full.store(RESET_FULL, Ordering::SeqCst);
        self.half.store(RESET_HALF, Ordering::SeqCst);
        self.count.store(0, Ordering::SeqCst);
        self.ctrl.store(0, Ordering::SeqCst);
    }

    fn reg(&self, reg: ChannelReg) -> &AtomicU32 {
        match reg {
            ChannelReg::Full => &self.full,
            ChannelReg::Half => &self.half,
            ChannelReg::Count => &self.count,
            ChannelReg::Ctrl => &self.ctrl,
        }
    }
}

/// JZ4780 timer & counter unit.
///
/// Each channel counts up on its own virtual-clock timer while its enable
/// bit is set, latching sticky half/full flags. The three output lines are
/// recomputed from `flag & !mask` after every tick and every handled register
/// write. Every register is its own atomic, so bus writes and timer callbacks
/// can race; a recompute only sees a consistent view of each word, not of the
/// whole unit.
pub struct Tcu {
    clock: Arc<VirtualClock>,
    irqs: [IrqLine; NUM_IRQS],
    channels: Vec<Channel>,
    enable: AtomicU32,
    flag: AtomicU32,
    stop: AtomicU32,
    mask: AtomicU32,
}

impl Tcu {
    pub fn new(clock: &Arc<VirtualClock>, irqs: [IrqLine; NUM_IRQS]) -> Result<Arc<Self>, TcuError> {
        let mut channels = Vec::new();
        channels
            .try_reserve_exact(CHANNELS.len())
            .map_err(TcuError::Alloc)?;

        let tcu = Arc::new_cyclic(|tcu: &Weak<Tcu>| {
            channels.extend(CHANNELS.iter().map(|&idx| {
                let timer = clock.new_timer(Self::tick_callback(tcu.clone(), idx));
                clock.modify(timer, clock.now_ns() + FIRST_TICK_NS);
                Channel::new(idx, timer)
            }));

            Tcu {
                clock: clock.clone(),
                irqs,
                channels,
                enable: AtomicU32::new(0),
                flag: AtomicU32::new(0),
                stop: AtomicU32::new(!0),
                mask: AtomicU32::new(!0),
            }
        });
        Ok(tcu)
    }

    fn tick_callback(tcu: Weak<Tcu>, idx: usize) -> TimerCallback {
        Box::new(move |clock, timer| {
            // Gone with the machine.
            let Some(tcu) = tcu.upgrade() else {
                return;
            };
            tcu.tick(idx);
            clock.modify(timer, clock.now_ns() + TICK_PERIOD_NS);
        })
    }

    // Disabled channels still get their callback; it just does nothing.
    fn tick(&self, idx: usize) {
        let Ok(channel) = self.channel_ref(idx) else {
            return;
        };

        if self.enable.load(Ordering::SeqCst) & u32::bit(idx) != 0 {
            channel.count.fetch_add(TICK_INCREMENT, Ordering::SeqCst);
            self.update(channel);
            self.update_irqs();
        }
    }

    fn channel_ref(&self, idx: usize) -> Result<&Channel, TcuError> {
        self.channels
            .iter()
            .find(|c| c.idx == idx)
            .ok_or(TcuError::InvalidChannel(idx))
    }

    fn bitset(&self, set: Bitset) -> &AtomicU32 {
        match set {
            Bitset::Enable => &self.enable,
            Bitset::Stop => &self.stop,
            Bitset::Mask => &self.mask,
            Bitset::Flag => &self.flag,
        }
    }

    // Latch the channel's flags from its count. Flags are only ever set here.
    fn update(&self, channel: &Channel) {
        let count = channel.count.load(Ordering::SeqCst);

        if channel.idx != OST_CHANNEL && count >= channel.half.load(Ordering::SeqCst) {
            self.flag.fetch_or(u32::bit(HALF_FLAG_SHIFT + channel.idx), Ordering::SeqCst);
        }

        if count >= channel.full.load(Ordering::SeqCst) {
            self.flag.fetch_or(u32::bit(channel.idx), Ordering::SeqCst);
            channel.count.store(0, Ordering::SeqCst);
        }
    }

    fn update_all(&self) {
        for channel in &self.channels {
            self.update(channel);
        }
    }

    fn update_many(&self, _channels: u32) {
        // TODO: only update the channels whose bits are set in `_channels`.
        self.update_all();
    }

    fn update_irqs(&self) {
        let pending = self.flag.load(Ordering::SeqCst) & !self.mask.load(Ordering::SeqCst);
        for (line, bits) in self.irqs.iter().zip(IRQ_FLAG_MASKS) {
            line.set(pending & bits != 0);
        }
    }

    ///////////////////////////////////////////////////////////////////////////

    pub fn read_count(&self, idx: usize) -> Result<u32, TcuError> {
        Ok(self.channel_ref(idx)?.count.load(Ordering::SeqCst))
    }

    /// Writes one of a channel's registers. Full and half are 16 bits wide.
    pub fn write_channel(&self, idx: usize, reg: ChannelReg, val: u32) -> Result<(), TcuError> {
        let channel = self.channel_ref(idx)?;
        let val = match reg {
            ChannelReg::Full | ChannelReg::Half => val & DATA_MASK,
            ChannelReg::Count | ChannelReg::Ctrl => val,
        };
        channel.reg(reg).store(val, Ordering::SeqCst);

        self.update(channel);
        self.update_irqs();
        Ok(())
    }

    /// Writes, sets bits in, or clears bits in one of the TCU-wide registers.
    /// Flag writes only touch the output lines; the others also update the
    /// channels.
    pub fn update_bitset(&self, set: Bitset, op: BitOp, val: u32) {
        let word = self.bitset(set);
        match op {
            BitOp::Write => word.store(val, Ordering::SeqCst),
            BitOp::Set => {
                word.fetch_or(val, Ordering::SeqCst);
            }
            BitOp::Clear => {
                word.fetch_and(!val, Ordering::SeqCst);
            }
        }

        match (set, op) {
            (Bitset::Flag, _) => (),
            (_, BitOp::Write) => self.update_all(),
            (_, BitOp::Set | BitOp::Clear) => self.update_many(val),
        }
        self.update_irqs();
    }

    pub fn enable(&self) -> u32 {
        self.enable.load(Ordering::SeqCst)
    }

    pub fn flag(&self) -> u32 {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn stop(&self) -> u32 {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn mask(&self) -> u32 {
        self.mask.load(Ordering::SeqCst)
    }

    pub fn channel(&self, idx: usize) -> Result<ChannelState, TcuError> {
        let channel = self.channel_ref(idx)?;
        Ok(ChannelState {
            full: channel.full.load(Ordering::SeqCst),
            half: channel.half.load(Ordering::SeqCst),
            count: channel.count.load(Ordering::SeqCst),
            ctrl: channel.ctrl.load(Ordering::SeqCst),
        })
    }

    /// The virtual-clock timer driving channel `idx`.
    pub fn channel_timer(&self, idx: usize) -> Result<TimerId, TcuError> {
        Ok(self.channel_ref(idx)?.timer)
    }

    fn decode_channel(offset: u64) -> Option<(usize, Option<ChannelReg>)> {
        if !(CHANNEL_BASE..CHANNEL_END).contains(&offset) {
            return None;
        }
        let idx = ((offset - CHANNEL_BASE) / CHANNEL_STRIDE) as usize;
        Some((idx, ChannelReg::from_u64(offset % CHANNEL_STRIDE)))
    }
}

impl Drop for Tcu {
    fn drop(&mut self) {
        for channel in &self.channels {
            self.clock.retire(channel.timer);
        }
    }
}

impl MmioHandler for Tcu {
    fn name(&self) -> &str {
        "jz4780-tcu"
    }

    fn size(&self) -> u64 {
        TCU_SIZE
    }

    fn reset(&self) {
        self.enable.store(0, Ordering::SeqCst);
        self.flag.store(0, Ordering::SeqCst);
        self.stop.store(!0, Ordering::SeqCst);
        self.mask.store(!0, Ordering::SeqCst);
        for channel in &self.channels {
            channel.reset();
        }
        self.update_irqs();
    }

    // Only the counters can be read back.
    fn read(&self, offset: u64, _size: AccessSize) -> u64 {
        let count = match Self::decode_channel(offset) {
            Some((idx, Some(ChannelReg::Count))) => self.read_count(idx).ok(),
            _ => None,
        };

        match count {
            Some(count) => {
                trace!("tcu: read {offset:#x} -> {count:#x}");
                count as u64
            }
            None => {
                warn!("tcu: unhandled register read {offset:#x}");
                0
            }
        }
    }

    fn write(&self, offset: u64, _size: AccessSize, val: u64) {
        trace!("tcu: write {offset:#x} <- {val:#x}");
        let val = val as u32;

        if let Some((idx, reg)) = Self::decode_channel(offset) {
            let Some(reg) = reg else {
                warn!("tcu: unhandled register write {offset:#x}");
                return;
            };
            if let Err(e) = self.write_channel(idx, reg, val) {
                warn!("tcu: write of {val:#x} to {offset:#x}: {e}");
            }
            return;
        }

        match TcuReg::from_u64(offset) {
            Some(reg) => {
                let (set, op) = reg.target();
                self.update_bitset(set, op, val);
            }
            None => warn!("tcu: unhandled register write {offset:#x}"),
        }
    }
}
