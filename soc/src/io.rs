pub mod cgu;
pub mod intc;
pub mod tcu;

use common::mem::AccessSize;

/// A device window on the register bus. Offsets are relative to the start of
/// the window. Handlers take `&self` because timer callbacks reach the same
/// device concurrently with bus accesses; devices keep their registers in
/// atomics.
pub trait MmioHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Length of the window in bytes.
    fn size(&self) -> u64;

    fn reset(&self) {}

    fn read(&self, offset: u64, size: AccessSize) -> u64;
    fn write(&self, offset: u64, size: AccessSize, val: u64);
}
