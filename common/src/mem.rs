use bytemuck::{bytes_of, pod_read_unaligned};
use derive_more::Display;

/// Width of a single bus access.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum AccessSize {
    #[display(fmt = "1")]
    Byte,
    #[display(fmt = "2")]
    Half,
    #[display(fmt = "4")]
    Word,
    #[display(fmt = "8")]
    Double,
}

impl AccessSize {
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(AccessSize::Byte),
            2 => Some(AccessSize::Half),
            4 => Some(AccessSize::Word),
            8 => Some(AccessSize::Double),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            AccessSize::Byte => 1,
            AccessSize::Half => 2,
            AccessSize::Word => 4,
            AccessSize::Double => 8,
        }
    }

    pub fn mask(self) -> u64 {
        match self {
            AccessSize::Byte => 0xff,
            AccessSize::Half => 0xffff,
            AccessSize::Word => 0xffff_ffff,
            AccessSize::Double => u64::MAX,
        }
    }
}

// Native endian, like the devices on the bus.
pub fn read_ne(buf: &[u8], size: AccessSize) -> u64 {
    let buf = &buf[..size.bytes()];
    match size {
        AccessSize::Byte => buf[0] as u64,
        AccessSize::Half => pod_read_unaligned::<u16>(buf) as u64,
        AccessSize::Word => pod_read_unaligned::<u32>(buf) as u64,
        AccessSize::Double => pod_read_unaligned::<u64>(buf),
    }
}

pub fn write_ne(buf: &mut [u8], size: AccessSize, val: u64) {
    let buf = &mut buf[..size.bytes()];
    match size {
        AccessSize::Byte => buf[0] = val as u8,
        AccessSize::Half => buf.copy_from_slice(bytes_of(&(val as u16))),
        AccessSize::Word => buf.copy_from_slice(bytes_of(&(val as u32))),
        AccessSize::Double => buf.copy_from_slice(bytes_of(&val)),
    }
}
