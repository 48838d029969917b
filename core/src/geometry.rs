use serde::{Deserialize, Serialize};
use crate::{DosError, DosResult};

/// Size of one on-disk directory record.
pub const DIRECTORY_ENTRY_SIZE: u64 = 32;

/// Byte-level layout of a FAT16 volume inside an image.
///
/// Produced upstream from the partition table and the BIOS parameter block;
/// the FAT engine consumes it without knowing where the numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGeometry {
    pub bytes_per_fat: u32,
    pub fat_copies: u8,
    pub fat_offset: u64,
    pub bytes_per_cluster: u32,
    pub cluster_count: u32,
    pub root_directory_entries: u16,
    pub root_directory_offset: u64,
    pub data_offset: u64,
}

impl VolumeGeometry {
    /// Geometry for a fresh volume: root directory directly after the FAT
    /// copies, data region directly after the root directory.
    pub fn layout(
        fat_offset: u64,
        bytes_per_fat: u32,
        fat_copies: u8,
        bytes_per_cluster: u32,
        cluster_count: u32,
        root_directory_entries: u16,
    ) -> Self {
        let root_directory_offset = fat_offset + bytes_per_fat as u64 * fat_copies as u64;
        let data_offset = root_directory_offset
            + root_directory_entries as u64 * DIRECTORY_ENTRY_SIZE;
        Self {
            bytes_per_fat,
            fat_copies,
            fat_offset,
            bytes_per_cluster,
            cluster_count,
            root_directory_entries,
            root_directory_offset,
            data_offset,
        }
    }

    /// Reject values the FAT engine cannot work with.
    pub fn validate(&self) -> DosResult<()> {
        if self.fat_copies == 0 {
            return Err(DosError::InvalidGeometry("at least one FAT copy is required".into()));
        }
        if self.bytes_per_cluster == 0 || self.bytes_per_cluster as u64 % DIRECTORY_ENTRY_SIZE != 0 {
            return Err(DosError::InvalidGeometry(format!(
                "cluster size {} is not a multiple of {}",
                self.bytes_per_cluster, DIRECTORY_ENTRY_SIZE
            )));
        }
        // Entries 0 and 1 are reserved, so the table needs room for cluster_count + 2 words.
        let needed = (self.cluster_count as u64 + 2) * 2;
        if (self.bytes_per_fat as u64) < needed {
            return Err(DosError::InvalidGeometry(format!(
                "FAT of {} bytes cannot describe {} clusters",
                self.bytes_per_fat, self.cluster_count
            )));
        }
        // 0xFFF7 and above are the bad-cluster and end-of-chain values.
        if self.cluster_count as u64 + 1 > 0xFFF6 {
            return Err(DosError::InvalidGeometry(format!(
                "{} clusters exceeds the FAT16 limit",
                self.cluster_count
            )));
        }
        let fat_end = self.fat_offset + self.bytes_per_fat as u64 * self.fat_copies as u64;
        if self.root_directory_offset < fat_end {
            return Err(DosError::InvalidGeometry("root directory overlaps the FAT region".into()));
        }
        if self.data_offset < self.root_directory_offset + self.root_directory_bytes() {
            return Err(DosError::InvalidGeometry("data region overlaps the root directory".into()));
        }
        Ok(())
    }

    pub fn root_directory_bytes(&self) -> u64 {
        self.root_directory_entries as u64 * DIRECTORY_ENTRY_SIZE
    }

    /// Byte offset of FAT copy `copy`.
    pub fn fat_copy_offset(&self, copy: u8) -> u64 {
        self.fat_offset + copy as u64 * self.bytes_per_fat as u64
    }

    /// Byte offset of a data cluster. Callers validate `cluster >= 2`.
    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_offset + (cluster as u64 - 2) * self.bytes_per_cluster as u64
    }

    /// Highest valid data cluster number.
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    /// Bytes an image must have to hold the whole volume.
    pub fn volume_end(&self) -> u64 {
        self.data_offset + self.cluster_count as u64 * self.bytes_per_cluster as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> VolumeGeometry {
        VolumeGeometry::layout(512, 512, 2, 512, 100, 16)
    }

    #[test]
    fn test_layout_offsets() {
        let g = small();
        assert_eq!(g.root_directory_offset, 512 + 1024);
        assert_eq!(g.data_offset, 512 + 1024 + 16 * 32);
        assert_eq!(g.cluster_offset(2), g.data_offset);
        assert_eq!(g.cluster_offset(3), g.data_offset + 512);
        assert_eq!(g.fat_copy_offset(1), 1024);
        assert_eq!(g.max_cluster(), 101);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_rejects_small_fat() {
        let g = VolumeGeometry::layout(0, 8, 1, 512, 100, 16);
        assert!(matches!(g.validate(), Err(DosError::InvalidGeometry(_))));
    }

    #[test]
    fn test_rejects_zero_copies() {
        let mut g = small();
        g.fat_copies = 0;
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let g = small();
        let json = serde_json::to_string(&g).unwrap();
        let back: VolumeGeometry = serde_json::from_str(&json).unwrap();
        assert_eq!(g, back);
    }
}
