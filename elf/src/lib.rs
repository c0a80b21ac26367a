use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use common::misc::{ReadLe, WriteLe};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("not an ELF file")]
    BadMagic,
    #[error("unsupported ELF class {0} (only ELF32 is supported)")]
    UnsupportedClass(u8),
    #[error("unsupported ELF data encoding {0} (only little endian is supported)")]
    UnsupportedEncoding(u8),
    #[error("ELF machine {0} is not MIPS")]
    WrongMachine(u16),
    #[error("segment at offset {offset:#x} (size {size:#x}) runs past the end of the file")]
    Truncated { offset: u32, size: u32 },
    #[error("{0} segments do not fit in an ELF32 header")]
    TooManySegments(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A loadable (PT_LOAD) segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub vaddr: u32,
    pub paddr: u32,
    pub mem_size: u32,
    pub flags: u32,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct Elf {
    pub entry: u32,
    pub segments: Vec<Segment>,
}

impl Elf {
    const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
    const CLASS_32: u8 = 1;
    const DATA_LSB: u8 = 1;
    const VERSION_CURRENT: u8 = 1;
    const TYPE_EXEC: u16 = 2;
    const MACHINE_MIPS: u16 = 8;
    const PT_LOAD: u32 = 1;

    const EHDR_SIZE: u16 = 52;
    const PHDR_SIZE: u16 = 32;

    pub fn new(entry: u32) -> Elf {
        Elf {
            entry,
            segments: vec![],
        }
    }

    pub fn read_from(reader: &mut impl Read) -> Result<Elf, ElfError> {
        let mut buf = vec![];
        reader.read_to_end(&mut buf)?;
        Self::parse(&buf)
    }

    pub fn parse(bytes: &[u8]) -> Result<Elf, ElfError> {
        let mut reader = Cursor::new(bytes);

        let mut ident = [0u8; 16];
        reader.read_exact(&mut ident)?;
        if ident[..4] != Self::MAGIC {
            return Err(ElfError::BadMagic);
        }
        if ident[4] != Self::CLASS_32 {
            return Err(ElfError::UnsupportedClass(ident[4]));
        }
        if ident[5] != Self::DATA_LSB {
            return Err(ElfError::UnsupportedEncoding(ident[5]));
        }

        let _e_type = reader.read_u16_le()?;
        let machine = reader.read_u16_le()?;
        if machine != Self::MACHINE_MIPS {
            return Err(ElfError::WrongMachine(machine));
        }
        let _version = reader.read_u32_le()?;
        let entry = reader.read_u32_le()?;
        let phoff = reader.read_u32_le()?;
        let _shoff = reader.read_u32_le()?;
        let _flags = reader.read_u32_le()?;
        let _ehsize = reader.read_u16_le()?;
        let phentsize = reader.read_u16_le()?;
        let phnum = reader.read_u16_le()?;

        let mut segments = vec![];
        for i in 0..phnum as u64 {
            reader.seek(SeekFrom::Start(phoff as u64 + i * phentsize as u64))?;
            let p_type = reader.read_u32_le()?;
            let offset = reader.read_u32_le()?;
            let vaddr = reader.read_u32_le()?;
            let paddr = reader.read_u32_le()?;
            let file_size = reader.read_u32_le()?;
            let mem_size = reader.read_u32_le()?;
            let flags = reader.read_u32_le()?;
            let _align = reader.read_u32_le()?;

            if p_type != Self::PT_LOAD {
                continue;
            }

            let start = offset as usize;
            let Some(data) = start
                .checked_add(file_size as usize)
                .and_then(|end| bytes.get(start..end)) else {
                return Err(ElfError::Truncated { offset, size: file_size });
            };

            segments.push(Segment {
                vaddr,
                paddr,
                mem_size: mem_size.max(file_size),
                flags,
                data: data.to_vec(),
            });
        }

        Ok(Elf { entry, segments })
    }

    // Header, then program headers, then each segment's data in order.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<(), ElfError> {
        let phnum = u16::try_from(self.segments.len())
            .map_err(|_| ElfError::TooManySegments(self.segments.len()))?;

        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&Self::MAGIC);
        ident[4] = Self::CLASS_32;
        ident[5] = Self::DATA_LSB;
        ident[6] = Self::VERSION_CURRENT;
        writer.write_all(&ident)?;

        writer.write_u16_le(Self::TYPE_EXEC)?;
        writer.write_u16_le(Self::MACHINE_MIPS)?;
        writer.write_u32_le(Self::VERSION_CURRENT as u32)?;
        writer.write_u32_le(self.entry)?;
        writer.write_u32_le(Self::EHDR_SIZE as u32)?; // phoff
        writer.write_u32_le(0)?; // No section headers.
        writer.write_u32_le(0)?;
        writer.write_u16_le(Self::EHDR_SIZE)?;
        writer.write_u16_le(Self::PHDR_SIZE)?;
        writer.write_u16_le(phnum)?;
        writer.write_u16_le(0)?; // shentsize
        writer.write_u16_le(0)?; // shnum
        writer.write_u16_le(0)?; // shstrndx

        let mut offset = Self::EHDR_SIZE as u32 + Self::PHDR_SIZE as u32 * phnum as u32;
        for seg in &self.segments {
            let file_size = seg.data.len() as u32;
            writer.write_u32_le(Self::PT_LOAD)?;
            writer.write_u32_le(offset)?;
            writer.write_u32_le(seg.vaddr)?;
            writer.write_u32_le(seg.paddr)?;
            writer.write_u32_le(file_size)?;
            writer.write_u32_le(seg.mem_size.max(file_size))?;
            writer.write_u32_le(seg.flags)?;
            writer.write_u32_le(4)?;
            offset += file_size;
        }

        for seg in &self.segments {
            writer.write_all(&seg.data)?;
        }
        Ok(())
    }
}
