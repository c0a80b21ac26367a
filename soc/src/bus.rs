use std::collections::HashMap;
use std::sync::Arc;

use common::mem::{AccessSize, read_ne, write_ne};

use crate::io::MmioHandler;

use derive_more::IsVariant;
use log::{debug, trace};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("nothing mapped at {0:#x}")]
    Unmapped(u64),
    #[error("{size}-byte access at {addr:#x} runs past the end of {name}")]
    CrossesRegion {
        addr: u64,
        size: AccessSize,
        name: String,
    },
    #[error("{name} at {base:#x} (size {size:#x}) overlaps {other}")]
    Overlap {
        name: String,
        base: u64,
        size: u64,
        other: String,
    },
    #[error("{0} has zero size")]
    Empty(String),
    #[error("{addr:#x} is in {name}, which is not RAM")]
    NotRam { addr: u64, name: String },
}

const PAGE_SIZE: usize = 4096;

// Pages are allocated on first write of a non-zero byte; everything else
// reads as zero.
#[derive(Default)]
struct Ram {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE]>>,
}

impl Ram {
    fn read_byte(&self, offset: u64) -> u8 {
        let page = offset / PAGE_SIZE as u64;
        let idx = (offset % PAGE_SIZE as u64) as usize;
        self.pages.get(&page).map_or(0, |p| p[idx])
    }

    fn write_byte(&mut self, offset: u64, val: u8) {
        let page = offset / PAGE_SIZE as u64;
        let idx = (offset % PAGE_SIZE as u64) as usize;
        if val == 0 && !self.pages.contains_key(&page) {
            return;
        }
        self.pages
            .entry(page)
            .or_insert_with(|| Box::new([0; PAGE_SIZE]))[idx] = val;
    }

    fn read(&self, offset: u64, size: AccessSize) -> u64 {
        let mut buf = [0u8; 8];
        for (i, byte) in buf[..size.bytes()].iter_mut().enumerate() {
            *byte = self.read_byte(offset + i as u64);
        }
        read_ne(&buf, size)
    }

    fn write(&mut self, offset: u64, size: AccessSize, val: u64) {
        let mut buf = [0u8; 8];
        write_ne(&mut buf, size, val);
        for (i, byte) in buf[..size.bytes()].iter().enumerate() {
            self.write_byte(offset + i as u64, *byte);
        }
    }
}

#[derive(IsVariant)]
enum Region {
    Ram(Ram),
    Mmio(Arc<dyn MmioHandler>),
}

struct Mapping {
    name: String,
    base: u64,
    size: u64,
    region: Region,
}

impl Mapping {
    fn end(&self) -> u64 {
        self.base + self.size
    }

    fn contains(&self, addr: u64) -> bool {
        (self.base..self.end()).contains(&addr)
    }
}

/// Physical address space: RAM regions and device windows. Device accesses
/// are handed to the device with the offset into its window.
#[derive(Default)]
pub struct Bus {
    mappings: Vec<Mapping>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ram(&mut self, name: &str, base: u64, size: u64) -> Result<(), BusError> {
        debug!("bus: {name} RAM at {base:#x}, {size:#x} bytes");
        self.add_mapping(Mapping {
            name: name.to_string(),
            base,
            size,
            region: Region::Ram(Ram::default()),
        })
    }

    pub fn map_device(&mut self, base: u64, dev: Arc<dyn MmioHandler>) -> Result<(), BusError> {
        debug!("bus: {} at {base:#x}, {:#x} bytes", dev.name(), dev.size());
        self.add_mapping(Mapping {
            name: dev.name().to_string(),
            base,
            size: dev.size(),
            region: Region::Mmio(dev),
        })
    }

    fn add_mapping(&mut self, mapping: Mapping) -> Result<(), BusError> {
        if mapping.size == 0 {
            return Err(BusError::Empty(mapping.name));
        }
        if let Some(other) = self
            .mappings
            .iter()
            .find(|m| mapping.base < m.end() && m.base < mapping.end())
        {
            return Err(BusError::Overlap {
                name: mapping.name,
                base: mapping.base,
                size: mapping.size,
                other: other.name.clone(),
            });
        }

        let pos = self.mappings.partition_point(|m| m.base < mapping.base);
        self.mappings.insert(pos, mapping);
        Ok(())
    }

    fn index_of(&self, addr: u64, size: AccessSize) -> Result<usize, BusError> {
        let Some(idx) = self.mappings.iter().position(|m| m.contains(addr)) else {
            return Err(BusError::Unmapped(addr));
        };
        let mapping = &self.mappings[idx];
        if addr + size.bytes() as u64 > mapping.end() {
            return Err(BusError::CrossesRegion {
                addr,
                size,
                name: mapping.name.clone(),
            });
        }
        Ok(idx)
    }

    pub fn read(&self, addr: u64, size: AccessSize) -> Result<u64, BusError> {
        let mapping = &self.mappings[self.index_of(addr, size)?];
        let offset = addr - mapping.base;
        let val = match &mapping.region {
            Region::Ram(ram) => ram.read(offset, size),
            Region::Mmio(dev) => dev.read(offset, size) & size.mask(),
        };
        trace!("bus: read {addr:#x} sz={size} -> {val:#x}");
        Ok(val)
    }

    pub fn write(&mut self, addr: u64, size: AccessSize, val: u64) -> Result<(), BusError> {
        let idx = self.index_of(addr, size)?;
        let mapping = &mut self.mappings[idx];
        let offset = addr - mapping.base;
        let val = val & size.mask();
        trace!("bus: write {addr:#x} sz={size} <- {val:#x}");
        match &mut mapping.region {
            Region::Ram(ram) => ram.write(offset, size, val),
            Region::Mmio(dev) => dev.write(offset, size, val),
        }
        Ok(())
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, BusError> {
        Ok(self.read(addr, AccessSize::Word)? as u32)
    }

    pub fn write_u32(&mut self, addr: u64, val: u32) -> Result<(), BusError> {
        self.write(addr, AccessSize::Word, val as u64)
    }

    fn ram_mut(&mut self, addr: u64) -> Result<(u64, &mut Ram), BusError> {
        let idx = self.index_of(addr, AccessSize::Byte)?;
        let mapping = &mut self.mappings[idx];
        match &mut mapping.region {
            Region::Ram(ram) => Ok((addr - mapping.base, ram)),
            Region::Mmio(_) => Err(BusError::NotRam {
                addr,
                name: mapping.name.clone(),
            }),
        }
    }

    /// Copies `data` into RAM at `addr`. May span adjacent RAM regions, but
    /// not devices.
    pub fn load(&mut self, addr: u64, data: &[u8]) -> Result<(), BusError> {
        for (i, byte) in data.iter().enumerate() {
            let (offset, ram) = self.ram_mut(addr + i as u64)?;
            ram.write_byte(offset, *byte);
        }
        Ok(())
    }

    pub fn fill(&mut self, addr: u64, len: u64, val: u8) -> Result<(), BusError> {
        for i in 0..len {
            let (offset, ram) = self.ram_mut(addr + i)?;
            ram.write_byte(offset, val);
        }
        Ok(())
    }

    pub fn is_ram(&self, addr: u64) -> bool {
        self.mappings
            .iter()
            .any(|m| m.contains(addr) && m.region.is_ram())
    }

    /// Resets every device on the bus. RAM keeps its contents.
    pub fn reset(&self) {
        for mapping in &self.mappings {
            if let Region::Mmio(dev) = &mapping.region {
                trace!("bus: resetting {}", mapping.name);
                dev.reset();
            }
        }
    }
}
