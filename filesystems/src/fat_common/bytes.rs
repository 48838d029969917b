// Little-endian field packing for on-disk FAT structures

use byteorder::{ByteOrder, LittleEndian};

pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&buf[offset..offset + 2])
}

pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&buf[offset..offset + 4])
}

pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    LittleEndian::write_u16(&mut buf[offset..offset + 2], value);
}

pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[offset..offset + 4], value);
}

/// Copy `src` into an `N`-byte field, padding with `pad`. Extra bytes are dropped.
pub fn padded<const N: usize>(src: &[u8], pad: u8) -> [u8; N] {
    let mut field = [pad; N];
    let len = src.len().min(N);
    field[..len].copy_from_slice(&src[..len]);
    field
}

/// ASCII text of a space-padded field, trailing spaces removed.
pub fn trimmed_ascii(field: &[u8]) -> String {
    let end = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}
