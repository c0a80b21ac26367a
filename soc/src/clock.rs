use std::sync::Mutex;

use log::trace;

pub const NS_PER_US: u64 = 1_000;
pub const NS_PER_MS: u64 = 1_000_000;

pub type TimerCallback = Box<dyn FnMut(&VirtualClock, TimerId) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

struct TimerSlot {
    deadline: Option<u64>,
    // None while the callback is running.
    callback: Option<TimerCallback>,
    retired: bool,
}

struct ClockState {
    now: u64,
    timers: Vec<TimerSlot>,
}

/// Monotonic virtual time in nanoseconds, with single-shot timers.
///
/// Time only moves forward when the owner calls `advance`/`advance_to`.
/// Callbacks run without the internal lock held, so a callback may re-arm
/// its own timer (or any other).
pub struct VirtualClock {
    state: Mutex<ClockState>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    pub fn new() -> Self {
        VirtualClock {
            state: Mutex::new(ClockState {
                now: 0,
                timers: vec![],
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        // A panicking callback never holds the lock, so the state is still sound.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn now_ns(&self) -> u64 {
        self.lock().now
    }

    /// Creates an unarmed timer.
    pub fn new_timer(&self, callback: TimerCallback) -> TimerId {
        let mut state = self.lock();
        state.timers.push(TimerSlot {
            deadline: None,
            callback: Some(callback),
            retired: false,
        });
        TimerId(state.timers.len() - 1)
    }

    /// Arms (or re-arms) `id` to fire once at `deadline_ns`. Deadlines in the
    /// past fire on the next advance.
    pub fn modify(&self, id: TimerId, deadline_ns: u64) {
        let mut state = self.lock();
        let slot = &mut state.timers[id.0];
        if !slot.retired {
            slot.deadline = Some(deadline_ns);
        }
    }

    pub fn cancel(&self, id: TimerId) {
        self.lock().timers[id.0].deadline = None;
    }

    /// Cancels `id` for good and drops its callback.
    pub fn retire(&self, id: TimerId) {
        let mut state = self.lock();
        let slot = &mut state.timers[id.0];
        slot.deadline = None;
        slot.retired = true;
        slot.callback = None;
    }

    pub fn deadline(&self, id: TimerId) -> Option<u64> {
        self.lock().timers[id.0].deadline
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadline(id).is_some()
    }

    pub fn advance(&self, delta_ns: u64) -> usize {
        let target = self.now_ns().saturating_add(delta_ns);
        self.advance_to(target)
    }

    /// Runs every timer due at or before `target_ns` in deadline order (ties
    /// in creation order), then leaves the clock at `target_ns`. Returns the
    /// number of callbacks run.
    pub fn advance_to(&self, target_ns: u64) -> usize {
        let mut fired = 0;
        loop {
            let (id, mut callback) = {
                let mut state = self.lock();
                let next = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.callback.is_some())
                    .filter_map(|(i, slot)| slot.deadline.map(|d| (d, i)))
                    .filter(|(d, _)| *d <= target_ns)
                    .min();

                let Some((deadline, i)) = next else {
                    state.now = state.now.max(target_ns);
                    return fired;
                };

                state.now = state.now.max(deadline);
                let slot = &mut state.timers[i];
                slot.deadline = None;
                match slot.callback.take() {
                    Some(callback) => (TimerId(i), callback),
                    None => continue,
                }
            };

            trace!("clock: timer {} fired at {} ns", id.0, self.now_ns());
            callback(self, id);
            fired += 1;

            let mut state = self.lock();
            let slot = &mut state.timers[id.0];
            if !slot.retired {
                slot.callback = Some(callback);
            }
        }
    }
}
