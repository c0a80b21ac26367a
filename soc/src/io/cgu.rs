use common::constants::CGU_SIZE;
use common::mem::AccessSize;

use crate::io::MmioHandler;

use log::debug;

// Clock & power controller. Only here so the window is backed by a device;
// every access is logged and ignored.
#[derive(Default, Clone, Copy)]
pub struct Cgu();

impl Cgu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MmioHandler for Cgu {
    fn name(&self) -> &str {
        "jz4780-cgu"
    }

    fn size(&self) -> u64 {
        CGU_SIZE
    }

    fn read(&self, offset: u64, size: AccessSize) -> u64 {
        debug!("cgu: read {offset:#x} sz={size}");
        0
    }

    fn write(&self, offset: u64, size: AccessSize, val: u64) {
        debug!("cgu: *{offset:#x} = {val:#x} sz={size}");
    }
}
