// Helpers shared by the FAT16 on-disk structures

pub mod bytes;
pub mod constants;
pub mod timestamps;
