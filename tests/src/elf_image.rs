use elf::{Elf, ElfError, Segment};

fn sample() -> Elf {
    let mut elf = Elf::new(0x8000_1000);
    elf.segments.push(Segment {
        vaddr: 0x8000_0000,
        paddr: 0x8000_0000,
        mem_size: 0x20,
        flags: 0x5,
        data: (0..16).collect(),
    });
    elf.segments.push(Segment {
        vaddr: 0x8001_0000,
        paddr: 0x8001_0000,
        mem_size: 0x1000,
        flags: 0x6,
        data: vec![0xee; 8],
    });
    elf
}

fn to_bytes(elf: &Elf) -> Vec<u8> {
    let mut buf = vec![];
    elf.write_to(&mut buf).unwrap();
    buf
}

#[test]
fn written_image_parses_back() {
    let elf = sample();
    let bytes = to_bytes(&elf);
    assert_eq!(&bytes[..4], b"\x7fELF");
    assert_eq!(bytes.len(), 52 + 2 * 32 + 16 + 8);

    let parsed = Elf::parse(&bytes).unwrap();
    assert_eq!(parsed.entry, 0x8000_1000);
    assert_eq!(parsed.segments, elf.segments);

    let read = Elf::read_from(&mut bytes.as_slice()).unwrap();
    assert_eq!(read.segments, elf.segments);
}

#[test]
fn mem_size_is_at_least_file_size() {
    let mut elf = Elf::new(0);
    elf.segments.push(Segment {
        vaddr: 0,
        paddr: 0,
        mem_size: 0,
        flags: 0,
        data: vec![1; 12],
    });
    let parsed = Elf::parse(&to_bytes(&elf)).unwrap();
    assert_eq!(parsed.segments[0].mem_size, 12);
}

#[test]
fn rejects_foreign_images() {
    let bytes = to_bytes(&sample());

    let mut bad = bytes.clone();
    bad[1] = b'X';
    assert!(matches!(Elf::parse(&bad), Err(ElfError::BadMagic)));

    let mut bad = bytes.clone();
    bad[4] = 2;
    assert!(matches!(Elf::parse(&bad), Err(ElfError::UnsupportedClass(2))));

    let mut bad = bytes.clone();
    bad[5] = 2;
    assert!(matches!(Elf::parse(&bad), Err(ElfError::UnsupportedEncoding(2))));

    // x86.
    let mut bad = bytes.clone();
    bad[18] = 3;
    assert!(matches!(Elf::parse(&bad), Err(ElfError::WrongMachine(3))));
}

#[test]
fn rejects_truncated_images() {
    let bytes = to_bytes(&sample());
    assert!(matches!(
        Elf::parse(&bytes[..bytes.len() - 4]),
        Err(ElfError::Truncated { size: 8, .. })
    ));
    assert!(matches!(Elf::parse(&bytes[..30]), Err(ElfError::Io(_))));
    assert!(matches!(Elf::parse(&[]), Err(ElfError::Io(_))));
}
