// FAT16 volume boot sector and BIOS parameter block

use super::storage::VolumeStorage;
use crate::fat_common::bytes::{read_u16, read_u32, trimmed_ascii};
use crate::fat_common::constants::*;
use dosvol_core::{DosError, DosResult, VolumeGeometry, DIRECTORY_ENTRY_SIZE};
use log::{debug, warn};
use serde::Serialize;

const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;

/// Parsed BIOS parameter block of a FAT16 volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BiosParameterBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_copies: u8,
    pub root_entries: u16,
    pub total_sectors: u32,
    pub media: u8,
    pub sectors_per_fat: u16,
    pub hidden_sectors: u32,
    pub volume_id: Option<u32>,
    pub volume_label: Option<String>,
    pub filesystem_type: Option<String>,
}

impl BiosParameterBlock {
    pub fn parse(sector: &[u8]) -> DosResult<Self> {
        if sector.len() < SECTOR_SIZE {
            return Err(DosError::InvalidInput(format!(
                "boot sector needs {} bytes, got {}",
                SECTOR_SIZE,
                sector.len()
            )));
        }
        if sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2] != BOOT_SIGNATURE {
            return Err(DosError::InvalidInput("boot sector lacks the 55AA signature".into()));
        }

        let bytes_per_sector = read_u16(sector, BPB_BYTES_PER_SEC);
        if !bytes_per_sector.is_power_of_two() || !(512..=4096).contains(&bytes_per_sector) {
            return Err(DosError::InvalidInput(format!(
                "Invalid bytes per sector: {}",
                bytes_per_sector
            )));
        }
        let sectors_per_cluster = sector[BPB_SEC_PER_CLUS];
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(DosError::InvalidInput(format!(
                "Invalid sectors per cluster: {}",
                sectors_per_cluster
            )));
        }
        let fat_copies = sector[BPB_NUM_FATS];
        if fat_copies == 0 {
            return Err(DosError::InvalidInput("boot sector declares no FAT copies".into()));
        }
        let sectors_per_fat = read_u16(sector, BPB_FAT_SZ16);
        if sectors_per_fat == 0 {
            return Err(DosError::NotSupported(
                "16-bit FAT size is zero; this is not a FAT16 volume".into(),
            ));
        }

        let total16 = read_u16(sector, BPB_TOT_SEC16);
        let total_sectors = if total16 != 0 {
            total16 as u32
        } else {
            read_u32(sector, BPB_TOT_SEC32)
        };

        let extended = sector[BS16_BOOT_SIG] == EXTENDED_BOOT_SIGNATURE;
        let bpb = Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors: read_u16(sector, BPB_RSVD_SEC_CNT),
            fat_copies,
            root_entries: read_u16(sector, BPB_ROOT_ENT_CNT),
            total_sectors,
            media: sector[BPB_MEDIA],
            sectors_per_fat,
            hidden_sectors: read_u32(sector, BPB_HIDD_SEC),
            volume_id: extended.then(|| read_u32(sector, BS16_VOL_ID)),
            volume_label: extended.then(|| trimmed_ascii(&sector[BS16_VOL_LAB..BS16_VOL_LAB + 11])),
            filesystem_type: extended
                .then(|| trimmed_ascii(&sector[BS16_FIL_SYS_TYPE..BS16_FIL_SYS_TYPE + 8])),
        };

        let clusters = bpb.cluster_count()?;
        if !(FAT16_MIN_CLUSTERS..=FAT16_MAX_CLUSTERS).contains(&clusters) {
            warn!(
                "Cluster count {} is outside the FAT16 range {}..={}",
                clusters, FAT16_MIN_CLUSTERS, FAT16_MAX_CLUSTERS
            );
        }
        Ok(bpb)
    }

    /// Read and parse the boot sector at `volume_offset`.
    pub fn read(storage: &dyn VolumeStorage, volume_offset: u64) -> DosResult<Self> {
        let mut sector = vec![0u8; SECTOR_SIZE];
        storage.read_at(volume_offset, &mut sector)?;
        Self::parse(&sector)
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    pub fn root_directory_sectors(&self) -> u32 {
        let bps = self.bytes_per_sector as u32;
        (self.root_entries as u32 * DIRECTORY_ENTRY_SIZE as u32).div_ceil(bps)
    }

    fn data_start_sector(&self) -> u32 {
        self.reserved_sectors as u32
            + self.fat_copies as u32 * self.sectors_per_fat as u32
            + self.root_directory_sectors()
    }

    pub fn cluster_count(&self) -> DosResult<u32> {
        let data_sectors = self
            .total_sectors
            .checked_sub(self.data_start_sector())
            .ok_or_else(|| DosError::InvalidInput("volume is smaller than its metadata".into()))?;
        Ok(data_sectors / self.sectors_per_cluster as u32)
    }

    /// Byte layout of this volume when its boot sector sits at `volume_offset`.
    pub fn to_geometry(&self, volume_offset: u64) -> DosResult<VolumeGeometry> {
        let bps = self.bytes_per_sector as u64;
        let fat_offset = volume_offset + self.reserved_sectors as u64 * bps;
        let bytes_per_fat = self.sectors_per_fat as u32 * self.bytes_per_sector as u32;
        let root_directory_offset = fat_offset + bytes_per_fat as u64 * self.fat_copies as u64;
        let data_offset = root_directory_offset + self.root_directory_sectors() as u64 * bps;

        let geometry = VolumeGeometry {
            bytes_per_fat,
            fat_copies: self.fat_copies,
            fat_offset,
            bytes_per_cluster: self.bytes_per_cluster(),
            cluster_count: self.cluster_count()?,
            root_directory_entries: self.root_entries,
            root_directory_offset,
            data_offset,
        };
        debug!("Volume geometry: {:?}", geometry);
        Ok(geometry)
    }
}

/// Human-readable name for a media descriptor byte.
pub fn media_description(media: u8) -> &'static str {
    match media {
        MEDIA_FIXED => "fixed disk",
        MEDIA_REMOVABLE => "3.5\" 1.44M/2.88M floppy",
        0xF9 => "720K 3.5\" or 1.2M 5.25\" floppy",
        0xFA | 0xFB => "320K/640K floppy",
        0xFC..=0xFF => "5.25\" floppy",
        _ => "unknown",
    }
}
