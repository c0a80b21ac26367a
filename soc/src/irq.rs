use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Something that owns a set of numbered level-triggered inputs.
pub trait IrqHandler: Send + Sync {
    fn set_irq(&self, n: usize, level: bool);
}

/// One input of an `IrqHandler`. Cloning yields another handle to the same
/// input.
#[derive(Clone)]
pub struct IrqLine {
    handler: Arc<dyn IrqHandler>,
    n: usize,
}

impl IrqLine {
    pub fn new(handler: Arc<dyn IrqHandler>, n: usize) -> Self {
        IrqLine { handler, n }
    }

    /// A line that goes nowhere.
    pub fn disconnected() -> Self {
        IrqLine::new(Arc::new(Disconnected), 0)
    }

    pub fn set(&self, level: bool) {
        self.handler.set_irq(self.n, level);
    }

    pub fn raise(&self) {
        self.set(true);
    }

    pub fn lower(&self) {
        self.set(false);
    }

    pub fn number(&self) -> usize {
        self.n
    }
}

impl fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqLine").field("n", &self.n).finish_non_exhaustive()
    }
}

struct Disconnected;

impl IrqHandler for Disconnected {
    fn set_irq(&self, _n: usize, _level: bool) {}
}

////////////////////////////////////////////////////////////////////////////////

/// Latches the last level driven onto each of up to 64 inputs. Used for the
/// CPU's interrupt pins, and anywhere the final level of a line needs to be
/// observed.
#[derive(Default)]
pub struct IrqLevels {
    levels: AtomicU64,
}

impl IrqLevels {
    pub const MAX_LINES: usize = u64::BITS as usize;

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn line(self: &Arc<Self>, n: usize) -> IrqLine {
        assert!(n < Self::MAX_LINES, "IrqLevels has no line {n}");
        IrqLine::new(self.clone(), n)
    }

    pub fn level(&self, n: usize) -> bool {
        n < Self::MAX_LINES && self.levels.load(Ordering::SeqCst) & (1 << n) != 0
    }

    pub fn levels(&self) -> u64 {
        self.levels.load(Ordering::SeqCst)
    }
}

impl IrqHandler for IrqLevels {
    fn set_irq(&self, n: usize, level: bool) {
        if n >= Self::MAX_LINES {
            return;
        }
        if level {
            self.levels.fetch_or(1 << n, Ordering::SeqCst);
        } else {
            self.levels.fetch_and(!(1 << n), Ordering::SeqCst);
        }
    }
}
