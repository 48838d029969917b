// Master Boot Record partition table, used to find a FAT16 volume in a disk image

use super::storage::VolumeStorage;
use crate::fat_common::bytes::read_u32;
use crate::fat_common::constants::{
    BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET, PARTITION_ENTRY_COUNT, PARTITION_ENTRY_SIZE,
    PARTITION_TABLE_OFFSET, SECTOR_SIZE,
};
use dosvol_core::{DosError, DosResult};
use log::debug;
use serde::Serialize;
use std::fmt;

const START_CHS_OFFSET: usize = 1;
const TYPE_OFFSET: usize = 4;
const END_CHS_OFFSET: usize = 5;
const LBA_START_OFFSET: usize = 8;
const SECTOR_COUNT_OFFSET: usize = 12;
const BOOTABLE_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartitionType {
    Empty,
    Fat16(u8),
    Other(u8),
}

impl PartitionType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => PartitionType::Empty,
            // CHS, LBA and hidden variants of FAT16
            0x04 | 0x06 | 0x0E | 0x14 | 0x16 | 0x1E => PartitionType::Fat16(byte),
            other => PartitionType::Other(other),
        }
    }

    pub fn is_fat16(&self) -> bool {
        matches!(self, PartitionType::Fat16(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PartitionType::Empty => "Empty",
            PartitionType::Fat16(0x04) | PartitionType::Fat16(0x14) => "FAT16 <32M",
            PartitionType::Fat16(0x0E) | PartitionType::Fat16(0x1E) => "FAT16 LBA",
            PartitionType::Fat16(_) => "FAT16",
            PartitionType::Other(_) => "Other",
        }
    }
}

/// Legacy cylinder/head/sector address. Cylinders carry 10 bits, the top two
/// stored in the high bits of the sector byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Chs {
    pub cylinder: u16,
    pub head: u8,
    pub sector: u8,
}

impl Chs {
    fn parse(raw: &[u8]) -> Self {
        Self {
            head: raw[0],
            sector: raw[1] & 0x3F,
            cylinder: ((raw[1] as u16 & 0xC0) << 2) | raw[2] as u16,
        }
    }
}

impl fmt::Display for Chs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cylinder, self.head, self.sector)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    pub bootable: bool,
    pub start_chs: Chs,
    pub partition_type: PartitionType,
    pub end_chs: Chs,
    pub lba_start: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    fn parse(raw: &[u8]) -> Self {
        Self {
            bootable: raw[0] == BOOTABLE_FLAG,
            start_chs: Chs::parse(&raw[START_CHS_OFFSET..START_CHS_OFFSET + 3]),
            partition_type: PartitionType::from_byte(raw[TYPE_OFFSET]),
            end_chs: Chs::parse(&raw[END_CHS_OFFSET..END_CHS_OFFSET + 3]),
            lba_start: read_u32(raw, LBA_START_OFFSET),
            sector_count: read_u32(raw, SECTOR_COUNT_OFFSET),
        }
    }

    /// Byte offset of the partition's first sector within the image.
    pub fn byte_offset(&self) -> u64 {
        self.lba_start as u64 * SECTOR_SIZE as u64
    }

    pub fn byte_len(&self) -> u64 {
        self.sector_count as u64 * SECTOR_SIZE as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    pub entries: [PartitionEntry; PARTITION_ENTRY_COUNT],
}

impl PartitionTable {
    /// Parse the partition table out of sector 0.
    pub fn parse(sector: &[u8]) -> DosResult<Self> {
        if sector.len() < SECTOR_SIZE {
            return Err(DosError::InvalidInput(format!(
                "MBR needs {} bytes, got {}",
                SECTOR_SIZE,
                sector.len()
            )));
        }
        if sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2] != BOOT_SIGNATURE {
            return Err(DosError::InvalidInput(format!(
                "Invalid MBR signature: {:02X}{:02X} (should be 55AA)",
                sector[BOOT_SIGNATURE_OFFSET],
                sector[BOOT_SIGNATURE_OFFSET + 1]
            )));
        }

        let entry = |i: usize| {
            let offset = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            PartitionEntry::parse(&sector[offset..offset + PARTITION_ENTRY_SIZE])
        };
        Ok(Self { entries: [entry(0), entry(1), entry(2), entry(3)] })
    }

    /// Read and parse sector 0 of `storage`.
    pub fn read(storage: &dyn VolumeStorage) -> DosResult<Self> {
        let mut sector = vec![0u8; SECTOR_SIZE];
        storage.read_at(0, &mut sector)?;
        Self::parse(&sector)
    }

    /// Partition `index` (0-3), provided it holds a FAT16 volume.
    pub fn fat16_partition(&self, index: usize) -> DosResult<PartitionEntry> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| DosError::InvalidInput(format!("partition {} does not exist", index)))?;
        if !entry.partition_type.is_fat16() {
            return Err(DosError::NotSupported(format!(
                "partition {} has type {:?}, not FAT16",
                index, entry.partition_type
            )));
        }
        debug!(
            "Partition {}: {} at LBA {} ({} sectors), CHS {} to {}",
            index,
            entry.partition_type.name(),
            entry.lba_start,
            entry.sector_count,
            entry.start_chs,
            entry.end_chs
        );
        Ok(*entry)
    }

    /// First FAT16 partition in table order.
    pub fn first_fat16(&self) -> Option<(usize, PartitionEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.partition_type.is_fat16())
            .map(|(i, e)| (i, *e))
    }
}
