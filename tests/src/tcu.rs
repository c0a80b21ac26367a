use common::mem::AccessSize;
use soc_lib::MmioHandler;
use soc_lib::clock::VirtualClock;
use soc_lib::io::tcu::{
    BitOp, Bitset, ChannelReg, FIRST_TICK_NS, OST_CHANNEL, TICK_INCREMENT, TICK_PERIOD_NS, Tcu,
    TcuError,
};
use soc_lib::irq::IrqLevels;

use std::sync::Arc;
use std::thread;

const TER: u64 = 0x10;
const TESR: u64 = 0x14;
const TECR: u64 = 0x18;
const TSR: u64 = 0x1c;
const TFR: u64 = 0x20;
const TFSR: u64 = 0x24;
const TFCR: u64 = 0x28;
const TMR: u64 = 0x30;
const TMCR: u64 = 0x38;

fn chan(idx: u64, reg: u64) -> u64 {
    0x40 + idx * 0x10 + reg
}
const FULL: u64 = 0x0;
const HALF: u64 = 0x4;
const COUNT: u64 = 0x8;
const CTRL: u64 = 0xc;

// Line 0: OS timer. Line 1: timer 5. Line 2: the other timers.
const OST_LINE: usize = 0;
const T5_LINE: usize = 1;
const TIMERS_LINE: usize = 2;

struct Setup {
    clock: Arc<VirtualClock>,
    levels: Arc<IrqLevels>,
    tcu: Arc<Tcu>,
}

fn setup() -> Setup {
    let clock = Arc::new(VirtualClock::new());
    let levels = IrqLevels::new();
    let tcu = Tcu::new(&clock, [levels.line(0), levels.line(1), levels.line(2)]).unwrap();
    Setup { clock, levels, tcu }
}

// Deadline of the k-th tick (1-based) of a TCU created at time 0.
fn tick_time(k: u64) -> u64 {
    FIRST_TICK_NS + (k - 1) * TICK_PERIOD_NS
}

#[test]
fn reset_state() {
    let s = setup();
    let tcu = &s.tcu;
    assert_eq!(tcu.enable(), 0);
    assert_eq!(tcu.flag(), 0);
    assert_eq!(tcu.stop(), !0);
    assert_eq!(tcu.mask(), !0);

    for idx in [0, 3, 7, OST_CHANNEL] {
        let ch = tcu.channel(idx).unwrap();
        assert_eq!(ch.full, 0xffff);
        assert_eq!(ch.half, 0x7fff);
        assert_eq!(ch.count, 0);
        assert_eq!(ch.ctrl, 0);
        assert_eq!(s.clock.deadline(tcu.channel_timer(idx).unwrap()), Some(FIRST_TICK_NS));
    }
    assert_eq!(s.levels.levels(), 0);
}

#[test]
fn invalid_channels() {
    let s = setup();
    assert!(matches!(s.tcu.channel(8), Err(TcuError::InvalidChannel(8))));
    assert!(matches!(s.tcu.read_count(14), Err(TcuError::InvalidChannel(14))));
    assert!(matches!(
        s.tcu.write_channel(16, ChannelReg::Full, 0),
        Err(TcuError::InvalidChannel(16))
    ));
}

#[test]
fn count_reaching_full_latches_both_flags() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.write_channel(2, ChannelReg::Full, 100).unwrap();
    tcu.write_channel(2, ChannelReg::Half, 50).unwrap();
    assert_eq!(tcu.flag(), 0);

    tcu.write_channel(2, ChannelReg::Count, 100).unwrap();
    assert_eq!(tcu.flag(), (1 << 2) | (1 << 18));
    assert_eq!(tcu.read_count(2).unwrap(), 0);
}

#[test]
fn count_between_half_and_full() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.write_channel(4, ChannelReg::Full, 100).unwrap();
    tcu.write_channel(4, ChannelReg::Half, 50).unwrap();

    tcu.write_channel(4, ChannelReg::Count, 50).unwrap();
    assert_eq!(tcu.flag(), 1 << 20);
    assert_eq!(tcu.read_count(4).unwrap(), 50);

    tcu.write_channel(4, ChannelReg::Count, 99).unwrap();
    assert_eq!(tcu.flag(), 1 << 20);
    assert_eq!(tcu.read_count(4).unwrap(), 99);
}

#[test]
fn half_above_full_only_latches_full() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.write_channel(1, ChannelReg::Full, 100).unwrap();
    tcu.write_channel(1, ChannelReg::Half, 200).unwrap();

    tcu.write_channel(1, ChannelReg::Count, 150).unwrap();
    assert_eq!(tcu.flag(), 1 << 1);
    assert_eq!(tcu.read_count(1).unwrap(), 0);
}

#[test]
fn flags_are_sticky() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.write_channel(3, ChannelReg::Full, 10).unwrap();
    tcu.write_channel(3, ChannelReg::Half, 5).unwrap();
    tcu.write_channel(3, ChannelReg::Count, 10).unwrap();
    let latched = tcu.flag();
    assert_eq!(latched, (1 << 3) | (1 << 19));

    // Counter is back at zero but the flags stay until software clears them.
    tcu.write_channel(3, ChannelReg::Count, 0).unwrap();
    tcu.update_bitset(Bitset::Mask, BitOp::Write, 0);
    assert_eq!(tcu.flag(), latched);

    tcu.update_bitset(Bitset::Flag, BitOp::Clear, 1 << 19);
    assert_eq!(tcu.flag(), 1 << 3);
    tcu.update_bitset(Bitset::Flag, BitOp::Clear, 1 << 3);
    assert_eq!(tcu.flag(), 0);
}

#[test]
fn flag_writes_do_not_recompute_channels() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.write_channel(6, ChannelReg::Half, 50).unwrap();
    tcu.write_channel(6, ChannelReg::Count, 60).unwrap();
    assert_eq!(tcu.flag(), 1 << 22);

    tcu.update_bitset(Bitset::Flag, BitOp::Write, 0);
    assert_eq!(tcu.flag(), 0);

    // Any other register write recomputes and latches it again.
    tcu.update_bitset(Bitset::Mask, BitOp::Set, 0);
    assert_eq!(tcu.flag(), 1 << 22);
}

#[test]
fn mask_gates_lines() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.update_bitset(Bitset::Flag, BitOp::Set, 1 << 5);
    assert!(!s.levels.level(T5_LINE));

    tcu.update_bitset(Bitset::Mask, BitOp::Clear, 1 << 5);
    assert!(s.levels.level(T5_LINE));
    assert!(!s.levels.level(OST_LINE));
    assert!(!s.levels.level(TIMERS_LINE));

    tcu.update_bitset(Bitset::Mask, BitOp::Set, 1 << 5);
    assert!(!s.levels.level(T5_LINE));

    tcu.update_bitset(Bitset::Mask, BitOp::Clear, 1 << 5);
    assert!(s.levels.level(T5_LINE));

    tcu.update_bitset(Bitset::Flag, BitOp::Clear, 1 << 5);
    assert!(!s.levels.level(T5_LINE));
}

#[test]
fn lines_group_channels() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.update_bitset(Bitset::Mask, BitOp::Write, 0);

    let cases = [
        (1 << 15, [true, false, false]),
        (1 << 5, [false, true, false]),
        (1 << 21, [false, true, false]),
        (1 << 0, [false, false, true]),
        (1 << 7, [false, false, true]),
        (1 << 22, [false, false, true]),
        // No channel drives these.
        (1 << 8, [false, false, false]),
        (1 << 31, [false, false, false]),
    ];
    for (flags, lines) in cases {
        tcu.update_bitset(Bitset::Flag, BitOp::Write, flags);
        let got = [
            s.levels.level(OST_LINE),
            s.levels.level(T5_LINE),
            s.levels.level(TIMERS_LINE),
        ];
        assert_eq!(got, lines, "flags {flags:#x}");
    }
}

#[test]
fn recompute_is_idempotent() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.update_bitset(Bitset::Mask, BitOp::Write, !(1 << 2));
    tcu.write_channel(2, ChannelReg::Full, 10).unwrap();
    tcu.write_channel(2, ChannelReg::Count, 10).unwrap();

    let flag = tcu.flag();
    let levels = s.levels.levels();
    for _ in 0..3 {
        tcu.update_bitset(Bitset::Enable, BitOp::Set, 0);
        tcu.update_bitset(Bitset::Stop, BitOp::Clear, 0);
        assert_eq!(tcu.flag(), flag);
        assert_eq!(s.levels.levels(), levels);
    }
}

#[test]
fn repeated_register_writes_change_nothing() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.write_channel(2, ChannelReg::Full, 10).unwrap();
    tcu.write_channel(2, ChannelReg::Half, 5).unwrap();
    tcu.write_channel(2, ChannelReg::Count, 7).unwrap();

    let snapshot = || {
        (
            tcu.enable(),
            tcu.flag(),
            tcu.stop(),
            tcu.mask(),
            tcu.read_count(2).unwrap(),
            s.levels.levels(),
        )
    };

    let writes = [
        (TMR, 0xffdf_7ffb),
        (TER, 0x0000_0024),
        (TSR, 0x0000_00f0),
        (TFR, 0x0020_8021),
    ];
    for (reg, val) in writes {
        tcu.write(reg, AccessSize::Word, val);
        let once = snapshot();
        tcu.write(reg, AccessSize::Word, val);
        assert_eq!(snapshot(), once, "register {reg:#x}");
    }

    // Through the register-level API as well.
    for (set, val) in [
        (Bitset::Mask, 0x0000_7fdf),
        (Bitset::Enable, 0x0000_8001),
        (Bitset::Stop, 0x0000_ff00),
        (Bitset::Flag, 0x0044_0004),
    ] {
        tcu.update_bitset(set, BitOp::Write, val);
        let once = snapshot();
        tcu.update_bitset(set, BitOp::Write, val);
        assert_eq!(snapshot(), once, "{set:?}");
    }

    assert_eq!(tcu.mask(), 0x0000_7fdf);
    assert_eq!(tcu.enable(), 0x0000_8001);
    assert_eq!(tcu.stop(), 0x0000_ff00);
    assert_eq!(tcu.flag(), 0x0044_0004);
    // Only flag 18 and 22 are unmasked, both on the timers line.
    assert_eq!(s.levels.levels(), 1 << TIMERS_LINE);
}

#[test]
fn timer5_fires_on_first_tick() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.write(chan(5, FULL), AccessSize::Word, 100);
    tcu.write(chan(5, HALF), AccessSize::Word, 50);
    tcu.write(TMCR, AccessSize::Word, 0x0020_0020);
    tcu.write(TESR, AccessSize::Word, 1 << 5);
    assert_eq!(tcu.enable(), 1 << 5);
    assert!(!s.levels.level(T5_LINE));

    s.clock.advance(FIRST_TICK_NS);

    assert_eq!(tcu.flag() & 0x0020_0020, 0x0020_0020);
    assert!(s.levels.level(T5_LINE));
    assert!(tcu.read_count(5).unwrap() < 100);

    tcu.write(TFCR, AccessSize::Word, 0x0020_0020);
    assert!(!s.levels.level(T5_LINE));
}

#[test]
fn enabled_channel_counts_every_tick() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.update_bitset(Bitset::Enable, BitOp::Set, 1 << 0);
    tcu.update_bitset(Bitset::Mask, BitOp::Clear, 1 << 16);
    // Stopped channels still count.
    assert_eq!(tcu.stop(), !0);

    s.clock.advance_to(tick_time(3));
    assert_eq!(tcu.read_count(0).unwrap(), 3 * TICK_INCREMENT);
    assert_eq!(tcu.flag(), 0);
    assert!(!s.levels.level(TIMERS_LINE));

    // 40000 passes the reset half value of 0x7fff.
    s.clock.advance_to(tick_time(4));
    assert_eq!(tcu.read_count(0).unwrap(), 4 * TICK_INCREMENT);
    assert_eq!(tcu.flag(), 1 << 16);
    assert!(s.levels.level(TIMERS_LINE));

    // 70000 passes the reset full value of 0xffff.
    s.clock.advance_to(tick_time(7));
    assert_eq!(tcu.read_count(0).unwrap(), 0);
    assert_eq!(tcu.flag(), (1 << 16) | 1);

    // Other channels were never enabled.
    for idx in 1..8 {
        assert_eq!(tcu.read_count(idx).unwrap(), 0);
    }
}

#[test]
fn disabled_channels_keep_their_timers_armed() {
    let s = setup();
    let timer = s.tcu.channel_timer(3).unwrap();

    s.clock.advance_to(tick_time(2));
    assert_eq!(s.tcu.read_count(3).unwrap(), 0);
    assert_eq!(s.clock.deadline(timer), Some(tick_time(3)));

    s.tcu.update_bitset(Bitset::Enable, BitOp::Set, 1 << 3);
    s.clock.advance_to(tick_time(3));
    assert_eq!(s.tcu.read_count(3).unwrap(), TICK_INCREMENT);

    s.tcu.update_bitset(Bitset::Enable, BitOp::Clear, 1 << 3);
    s.clock.advance_to(tick_time(5));
    assert_eq!(s.tcu.read_count(3).unwrap(), TICK_INCREMENT);
}

#[test]
fn os_timer_has_no_half_flag() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.update_bitset(Bitset::Enable, BitOp::Set, 1 << OST_CHANNEL);
    tcu.update_bitset(Bitset::Mask, BitOp::Clear, 1 << OST_CHANNEL);

    s.clock.advance_to(tick_time(6));
    assert_eq!(tcu.read_count(OST_CHANNEL).unwrap(), 6 * TICK_INCREMENT);
    assert_eq!(tcu.flag(), 0);

    s.clock.advance_to(tick_time(7));
    assert_eq!(tcu.flag(), 1 << OST_CHANNEL);
    assert!(s.levels.level(OST_LINE));
    assert!(!s.levels.level(TIMERS_LINE));
}

#[test]
fn only_counters_read_back() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.write_channel(2, ChannelReg::Count, 0x1234).unwrap();
    tcu.update_bitset(Bitset::Flag, BitOp::Write, 0xffff_ffff);
    tcu.update_bitset(Bitset::Enable, BitOp::Write, 0xff);

    assert_eq!(tcu.read(chan(2, COUNT), AccessSize::Word), 0x1234);
    assert_eq!(tcu.read(chan(2, FULL), AccessSize::Word), 0);
    assert_eq!(tcu.read(chan(2, HALF), AccessSize::Word), 0);
    assert_eq!(tcu.read(chan(2, CTRL), AccessSize::Word), 0);
    assert_eq!(tcu.read(TER, AccessSize::Word), 0);
    assert_eq!(tcu.read(TFR, AccessSize::Word), 0);
    assert_eq!(tcu.read(TMR, AccessSize::Word), 0);
    assert_eq!(tcu.read(0x1f0, AccessSize::Word), 0);
}

#[test]
fn register_writes() {
    let s = setup();
    let tcu = &s.tcu;

    tcu.write(chan(7, FULL), AccessSize::Word, 0x1_2345);
    tcu.write(chan(7, HALF), AccessSize::Word, 0xf_0010);
    tcu.write(chan(7, CTRL), AccessSize::Word, 0xdead_beef);
    let ch = tcu.channel(7).unwrap();
    assert_eq!(ch.full, 0x2345);
    assert_eq!(ch.half, 0x0010);
    assert_eq!(ch.ctrl, 0xdead_beef);

    tcu.write(TER, AccessSize::Word, 0x0f);
    tcu.write(TECR, AccessSize::Word, 0x03);
    tcu.write(TESR, AccessSize::Word, 0x80);
    assert_eq!(tcu.enable(), 0x8c);

    tcu.write(TFSR, AccessSize::Word, 0x4);
    assert_eq!(tcu.flag() & 0x4, 0x4);
    tcu.write(TFR, AccessSize::Word, 0);
    assert_eq!(tcu.flag(), 0);

    // Nothing lives here.
    tcu.write(0x00, AccessSize::Word, 0xffff_ffff);
    tcu.write(0x1f0, AccessSize::Word, 0xffff_ffff);
    assert_eq!(tcu.flag(), 0);
    assert_eq!(tcu.enable(), 0x8c);
}

#[test]
fn reset_restores_defaults() {
    let s = setup();
    let tcu = &s.tcu;
    tcu.update_bitset(Bitset::Mask, BitOp::Write, 0);
    tcu.update_bitset(Bitset::Enable, BitOp::Write, 0xff);
    tcu.write_channel(0, ChannelReg::Full, 5).unwrap();
    tcu.write_channel(0, ChannelReg::Count, 5).unwrap();
    assert!(s.levels.level(TIMERS_LINE));

    tcu.reset();
    assert_eq!(tcu.enable(), 0);
    assert_eq!(tcu.flag(), 0);
    assert_eq!(tcu.mask(), !0);
    assert_eq!(tcu.stop(), !0);
    assert_eq!(tcu.channel(0).unwrap().full, 0xffff);
    assert!(!s.levels.level(TIMERS_LINE));
}

#[test]
fn dropping_the_tcu_retires_its_timers() {
    let s = setup();
    let timers: Vec<_> = [0, 5, OST_CHANNEL]
        .into_iter()
        .map(|idx| s.tcu.channel_timer(idx).unwrap())
        .collect();
    drop(s.tcu);

    for timer in timers {
        assert!(!s.clock.is_pending(timer));
    }
    assert_eq!(s.clock.advance(10 * TICK_PERIOD_NS), 0);
}

#[test]
fn bus_writes_race_with_ticks() {
    let s = setup();
    s.tcu.update_bitset(Bitset::Enable, BitOp::Write, 0xff);

    let writer = {
        let tcu = s.tcu.clone();
        thread::spawn(move || {
            for i in 0..1000u64 {
                tcu.write(TMR, AccessSize::Word, i & 0xff);
                tcu.write(TFCR, AccessSize::Word, 0xffff_ffff);
            }
        })
    };
    s.clock.advance(100 * TICK_PERIOD_NS);
    writer.join().unwrap();

    // Whatever interleaving happened, counts stay below full and the lines
    // match the final flag and mask words.
    for idx in 0..8 {
        assert!(s.tcu.read_count(idx).unwrap() < 0xffff);
    }
    s.tcu.update_bitset(Bitset::Mask, BitOp::Set, 0);
    let pending = s.tcu.flag() & !s.tcu.mask();
    assert_eq!(s.levels.level(T5_LINE), pending & 0x0020_0020 != 0);
    assert_eq!(s.levels.level(TIMERS_LINE), pending & 0x00df_00df != 0);
}
