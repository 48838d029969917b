// FAT16 table engine
//
// Owns the in-memory mirror of the file allocation table and the free-space
// pool built from it. Allocation only reserves clusters; `store` links them
// in memory and `commit` writes the table to every on-disk copy.

use super::dir_entry::{scan_region, DirEntry, Region, DIR_ENTRY_SIZE};
use super::free_space::FreeSpacePool;
use super::root_directory::RootDirectory;
use super::storage::VolumeStorage;
use crate::fat_common::bytes::{read_u16, write_u16};
use crate::fat_common::constants::{
    FAT16_BAD, FAT16_EOC, FAT16_EOC_MIN, FAT16_ENTRY_SIZE, FAT16_FREE, FIRST_DATA_CLUSTER,
};
use dosvol_core::{DosError, DosResult, VolumeGeometry};
use log::{debug, info, trace, warn};
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct Fat16Table {
    storage: Arc<dyn VolumeStorage>,
    geometry: VolumeGeometry,
    table: RwLock<Vec<u8>>,
    pool: FreeSpacePool,
    media_type: u8,
    end_of_chain: u16,
}

fn entry(table: &[u8], cluster: u16) -> u16 {
    read_u16(table, cluster as usize * FAT16_ENTRY_SIZE)
}

fn set_entry(table: &mut [u8], cluster: u16, value: u16) {
    write_u16(table, cluster as usize * FAT16_ENTRY_SIZE, value);
}

/// Free clusters in ascending order, minus those still reserved.
fn scan_free(table: &[u8], max_cluster: u16, reserved: &HashSet<u16>) -> Vec<u16> {
    (FIRST_DATA_CLUSTER..=max_cluster)
        .filter(|&c| entry(table, c) == FAT16_FREE && !reserved.contains(&c))
        .collect()
}

impl Fat16Table {
    /// Load FAT copy 0 of an existing volume.
    pub fn open(storage: Arc<dyn VolumeStorage>, geometry: VolumeGeometry) -> DosResult<Arc<Self>> {
        geometry.validate()?;

        let mut table = vec![0u8; geometry.bytes_per_fat as usize];
        storage.read_at(geometry.fat_copy_offset(0), &mut table)?;

        let media_type = (entry(&table, 0) & 0x00FF) as u8;
        let mut end_of_chain = entry(&table, 1);
        if end_of_chain < FAT16_EOC_MIN {
            warn!(
                "FAT entry 1 holds {:#06x}, not an end-of-chain value; using {:#06x}",
                end_of_chain, FAT16_EOC
            );
            end_of_chain = FAT16_EOC;
        }

        let max_cluster = geometry.max_cluster() as u16;
        let free = scan_free(&table, max_cluster, &HashSet::new());
        info!(
            "Opened FAT16 volume: {} clusters of {} bytes, {} free, media {:#04x}",
            geometry.cluster_count,
            geometry.bytes_per_cluster,
            free.len(),
            media_type
        );

        Ok(Arc::new(Self {
            storage,
            geometry,
            table: RwLock::new(table),
            pool: FreeSpacePool::new(&free),
            media_type,
            end_of_chain,
        }))
    }

    /// Write an empty table to every FAT copy and clear the root directory region.
    pub fn initialize(
        storage: Arc<dyn VolumeStorage>,
        geometry: VolumeGeometry,
        media_type: u8,
        end_of_chain: u16,
    ) -> DosResult<Arc<Self>> {
        geometry.validate()?;
        if end_of_chain < FAT16_EOC_MIN {
            return Err(DosError::InvalidInput(format!(
                "{:#06x} is not an end-of-chain marker",
                end_of_chain
            )));
        }

        let mut table = vec![0u8; geometry.bytes_per_fat as usize];
        set_entry(&mut table, 0, 0xFF00 | media_type as u16);
        set_entry(&mut table, 1, end_of_chain);

        for copy in 0..geometry.fat_copies {
            storage.write_at(geometry.fat_copy_offset(copy), &table)?;
        }
        let root = vec![0u8; geometry.root_directory_bytes() as usize];
        storage.write_at(geometry.root_directory_offset, &root)?;

        let free: Vec<u16> = (FIRST_DATA_CLUSTER..=geometry.max_cluster() as u16).collect();
        info!(
            "Initialized FAT16 volume: {} FAT copies, {} clusters, {} root entries",
            geometry.fat_copies, geometry.cluster_count, geometry.root_directory_entries
        );

        Ok(Arc::new(Self {
            storage,
            geometry,
            table: RwLock::new(table),
            pool: FreeSpacePool::new(&free),
            media_type,
            end_of_chain,
        }))
    }

    fn read_table(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn max_cluster(&self) -> u16 {
        self.geometry.max_cluster() as u16
    }

    fn check_cluster(&self, cluster: u16) -> DosResult<()> {
        if cluster < FIRST_DATA_CLUSTER || cluster > self.max_cluster() {
            return Err(DosError::InvalidCluster(cluster as u32));
        }
        Ok(())
    }

    /// Reserve `count` clusters without touching the table or the disk.
    pub fn allocate(&self, count: usize) -> DosResult<Vec<u16>> {
        let clusters = self.pool.claim(count)?;
        debug!("Allocated {} clusters: {:?}", count, clusters);
        Ok(clusters)
    }

    /// Reserve enough clusters to hold `byte_size` bytes.
    pub fn allocate_bytes(&self, byte_size: u64) -> DosResult<Vec<u16>> {
        let per_cluster = self.geometry.bytes_per_cluster as u64;
        let count = byte_size.div_ceil(per_cluster);
        self.allocate(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// Link `chain` in memory: each cluster points at the next, the last at
    /// the end-of-chain marker.
    pub fn store(&self, chain: &[u16]) -> DosResult<()> {
        for &cluster in chain {
            self.check_cluster(cluster)?;
        }

        {
            let mut table = self.write_table();
            for pair in chain.windows(2) {
                set_entry(&mut table, pair[0], pair[1]);
            }
            if let Some(&last) = chain.last() {
                set_entry(&mut table, last, self.end_of_chain);
            }
        }
        self.pool.settle(chain);
        debug!("Stored chain of {} clusters starting at {:?}", chain.len(), chain.first());
        Ok(())
    }

    /// Mark `clusters` free and rebuild the pool from the table.
    pub fn free(&self, clusters: &[u16]) -> DosResult<()> {
        for &cluster in clusters {
            self.check_cluster(cluster)?;
        }

        let mut table = self.write_table();
        for &cluster in clusters {
            set_entry(&mut table, cluster, FAT16_FREE);
        }
        let max_cluster = self.max_cluster();
        self.pool
            .rebuild(clusters, |reserved| scan_free(&table, max_cluster, reserved));
        drop(table);

        debug!("Freed {} clusters, {} now free", clusters.len(), self.pool.count());
        Ok(())
    }

    /// Write the in-memory table to every FAT copy.
    pub fn commit(&self) -> DosResult<()> {
        let table = self.write_table();
        for copy in 0..self.geometry.fat_copies {
            self.storage.write_at(self.geometry.fat_copy_offset(copy), &table)?;
        }
        debug!("Committed FAT to {} copies", self.geometry.fat_copies);
        Ok(())
    }

    /// Follow the chain starting at `first` to its end.
    pub fn get_clusters(&self, first: u16) -> DosResult<Vec<u16>> {
        self.check_cluster(first)?;

        let table = self.read_table();
        let max_cluster = self.max_cluster();
        let mut chain = vec![first];
        let mut current = first;
        loop {
            let next = entry(&table, current);
            if next == self.end_of_chain {
                break;
            }
            if next >= FAT16_EOC_MIN {
                warn!("Chain from cluster {} ends with non-canonical marker {:#06x}", first, next);
                break;
            }
            if next == FAT16_FREE || next == FAT16_BAD || next < FIRST_DATA_CLUSTER || next > max_cluster {
                return Err(DosError::CorruptVolume(format!(
                    "cluster {} links to invalid cluster {:#06x}",
                    current, next
                )));
            }
            if chain.len() >= self.geometry.cluster_count as usize {
                return Err(DosError::CorruptVolume(format!(
                    "cycle detected in chain starting at cluster {}",
                    first
                )));
            }
            chain.push(next);
            current = next;
        }
        Ok(chain)
    }

    /// Raw table entry for `cluster`.
    pub fn next_cluster(&self, cluster: u16) -> DosResult<u16> {
        self.check_cluster(cluster)?;
        Ok(entry(&self.read_table(), cluster))
    }

    fn check_data_cluster(&self, cluster: u16) -> DosResult<u64> {
        if cluster < FIRST_DATA_CLUSTER {
            return Err(DosError::InvalidInput(format!(
                "cluster {} is reserved and holds no data",
                cluster
            )));
        }
        self.check_cluster(cluster)?;
        Ok(self.geometry.cluster_offset(cluster as u32))
    }

    pub fn read_cluster(&self, cluster: u16) -> DosResult<Vec<u8>> {
        let offset = self.check_data_cluster(cluster)?;
        let mut buffer = vec![0u8; self.geometry.bytes_per_cluster as usize];
        trace!("Reading cluster {} at {:#x}", cluster, offset);
        self.storage.read_at(offset, &mut buffer)?;
        Ok(buffer)
    }

    pub fn write_cluster(&self, data: &[u8], cluster: u16) -> DosResult<()> {
        let offset = self.check_data_cluster(cluster)?;
        if data.len() != self.geometry.bytes_per_cluster as usize {
            return Err(DosError::InvalidInput(format!(
                "cluster buffer is {} bytes, expected {}",
                data.len(),
                self.geometry.bytes_per_cluster
            )));
        }
        trace!("Writing cluster {} at {:#x}", cluster, offset);
        self.storage.write_at(offset, data)
    }

    /// Load the fixed root directory region.
    pub fn root_directory(self: &Arc<Self>) -> DosResult<RootDirectory> {
        let mut region = vec![0u8; self.geometry.root_directory_bytes() as usize];
        self.storage.read_at(self.geometry.root_directory_offset, &mut region)?;
        let entries = scan_region(&region, Region::Root);
        Ok(RootDirectory::new(
            Arc::clone(self),
            entries,
            self.geometry.root_directory_entries as usize,
        ))
    }

    /// Rewrite the whole root region: `entries` in order, then zeros.
    pub fn write_root_directory(&self, entries: &[DirEntry]) -> DosResult<()> {
        let max_entries = self.geometry.root_directory_entries as usize;
        if entries.len() > max_entries {
            return Err(DosError::DirectoryFull(max_entries));
        }
        let mut region = vec![0u8; self.geometry.root_directory_bytes() as usize];
        for (slot, dir_entry) in entries.iter().enumerate() {
            dir_entry.encode_into(&mut region[slot * DIR_ENTRY_SIZE..]);
        }
        trace!("Writing root directory with {} entries", entries.len());
        self.storage.write_at(self.geometry.root_directory_offset, &region)
    }

    pub fn free_cluster_count(&self) -> usize {
        self.pool.count()
    }

    pub fn free_space_bytes(&self) -> u64 {
        self.pool.count() as u64 * self.geometry.bytes_per_cluster as u64
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.geometry.bytes_per_cluster
    }

    pub fn media_type(&self) -> u8 {
        self.media_type
    }

    pub fn end_of_chain_marker(&self) -> u16 {
        self.end_of_chain
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }
}
