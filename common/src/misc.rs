use std::io::{self, Read, Write};

pub trait ReadLe {
    fn read_u16_le(&mut self) -> io::Result<u16>;
    fn read_u32_le(&mut self) -> io::Result<u32>;
}

impl<T: Read> ReadLe for T {
    fn read_u16_le(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

////////////////////////////////////////////////////////////////////////////////

pub trait WriteLe {
    fn write_u16_le(&mut self, val: u16) -> io::Result<()>;
    fn write_u32_le(&mut self, val: u32) -> io::Result<()>;
}

impl<T: Write> WriteLe for T {
    fn write_u16_le(&mut self, val: u16) -> io::Result<()> {
        self.write_all(&val.to_le_bytes())
    }

    fn write_u32_le(&mut self, val: u32) -> io::Result<()> {
        self.write_all(&val.to_le_bytes())
    }
}

////////////////////////////////////////////////////////////////////////////////

pub trait Bit {
    fn bit(n: usize) -> Self;
}

impl Bit for u32 {
    fn bit(n: usize) -> u32 {
        assert!(n < u32::BITS as usize);
        1u32 << n
    }
}
