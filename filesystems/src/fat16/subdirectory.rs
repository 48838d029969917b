// FAT16 subdirectories: entries packed into a growable cluster chain

use super::dir_entry::{scan_region, used_slots, DirEntry, EntryLocation, Region, DIR_ENTRY_SIZE};
use super::directory::{Directory, DirectoryHandle, Entries};
use super::fat_table::Fat16Table;
use dosvol_core::{DosError, DosResult};
use log::{debug, trace};
use std::sync::Arc;

/// A subdirectory handle. The chain is re-read from the FAT on every
/// operation, so handles to the same directory see each other's growth.
#[derive(Clone)]
pub struct SubDirectory {
    fat: Arc<Fat16Table>,
    clusters: Vec<u16>,
    volume_label: String,
}

impl SubDirectory {
    /// Wrap an already resolved chain. `clusters` must not be empty.
    pub fn new(fat: Arc<Fat16Table>, clusters: Vec<u16>, volume_label: String) -> Self {
        Self { fat, clusters, volume_label }
    }

    /// Chain as of the last operation through this handle.
    pub fn clusters(&self) -> &[u16] {
        &self.clusters
    }

    fn slots_per_cluster(&self) -> usize {
        self.fat.bytes_per_cluster() as usize / DIR_ENTRY_SIZE
    }

    fn refresh(&mut self) -> DosResult<()> {
        self.clusters = self.fat.get_clusters(self.first_cluster())?;
        Ok(())
    }

    /// Zero `cluster` and link it after the current last cluster. If the
    /// cluster cannot be written it is released again.
    fn append_cluster(&mut self, cluster: u16, first_entry: Option<&DirEntry>) -> DosResult<()> {
        let mut buffer = vec![0u8; self.fat.bytes_per_cluster() as usize];
        if let Some(entry) = first_entry {
            entry.encode_into(&mut buffer);
        }
        let linked = self
            .refresh()
            .and_then(|_| self.fat.write_cluster(&buffer, cluster))
            .and_then(|_| self.fat.store(&[self.last_cluster(), cluster]));
        if let Err(e) = linked {
            self.fat.free(&[cluster])?;
            return Err(e);
        }
        self.clusters.push(cluster);
        self.fat.commit()?;
        debug!("Directory at cluster {} grew to {} clusters", self.first_cluster(), self.clusters.len());
        Ok(())
    }
}

/// Lazily reads each cluster of a subdirectory and yields its entries.
pub struct EntryIter<'a> {
    fat: &'a Fat16Table,
    clusters: std::vec::IntoIter<u16>,
    pending: std::vec::IntoIter<DirEntry>,
    failed: bool,
}

impl<'a> EntryIter<'a> {
    fn new(fat: &'a Fat16Table, clusters: Vec<u16>) -> Self {
        Self {
            fat,
            clusters: clusters.into_iter(),
            pending: Vec::new().into_iter(),
            failed: false,
        }
    }
}

impl Iterator for EntryIter<'_> {
    type Item = DosResult<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.next() {
                return Some(Ok(entry));
            }
            if self.failed {
                return None;
            }
            let cluster = self.clusters.next()?;
            trace!("Scanning directory cluster {}", cluster);
            match self.fat.read_cluster(cluster) {
                Ok(buffer) => self.pending = scan_region(&buffer, Region::Cluster(cluster)).into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Directory for SubDirectory {
    fn fat(&self) -> &Arc<Fat16Table> {
        &self.fat
    }

    fn entries(&self) -> Entries<'_> {
        match self.fat.get_clusters(self.first_cluster()) {
            Ok(chain) => Box::new(EntryIter::new(&self.fat, chain)),
            Err(e) => Box::new(std::iter::once(Err::<DirEntry, _>(e))),
        }
    }

    fn first_cluster(&self) -> u16 {
        self.clusters[0]
    }

    fn last_cluster(&self) -> u16 {
        self.clusters[self.clusters.len() - 1]
    }

    fn add_entry(&mut self, entry: DirEntry) -> DosResult<DirEntry> {
        self.refresh()?;
        let last = self.last_cluster();
        let mut buffer = self.fat.read_cluster(last)?;
        let used = used_slots(&buffer);

        if used + 1 > self.slots_per_cluster() {
            let cluster = self
                .fat
                .allocate(1)?
                .first()
                .copied()
                .ok_or_else(|| DosError::InsufficientSpace { requested: 1, available: 0 })?;
            self.append_cluster(cluster, Some(&entry))?;
            return Ok(entry.at(EntryLocation::Cluster { cluster, offset: 0 }));
        }

        let offset = used * DIR_ENTRY_SIZE;
        entry.encode_into(&mut buffer[offset..]);
        self.fat.write_cluster(&buffer, last)?;
        debug!("Added entry {} to directory at cluster {}", entry.display_name(), self.first_cluster());
        Ok(entry.at(EntryLocation::Cluster { cluster: last, offset }))
    }

    fn remove_entry(&mut self, entry: &DirEntry) -> DosResult<()> {
        if entry.is_dot_entry() {
            return Err(DosError::InvalidInput(format!(
                "cannot remove {} from a directory",
                entry.display_name()
            )));
        }
        let start = entry.chain_start()?;
        self.refresh()?;

        let all = self.entries().collect::<DosResult<Vec<_>>>()?;
        let before = all.len();
        let retained: Vec<DirEntry> = all.into_iter().filter(|e| !e.matches(entry)).collect();
        if retained.len() == before {
            return Err(DosError::NotFound(entry.display_name()));
        }

        let slots = self.slots_per_cluster();
        let needed = retained.len().div_ceil(slots).max(1);
        let cluster_size = self.fat.bytes_per_cluster() as usize;
        for (index, &cluster) in self.clusters.iter().take(needed).enumerate() {
            let mut buffer = vec![0u8; cluster_size];
            for (slot, kept) in retained.iter().skip(index * slots).take(slots).enumerate() {
                kept.encode_into(&mut buffer[slot * DIR_ENTRY_SIZE..]);
            }
            self.fat.write_cluster(&buffer, cluster)?;
        }

        if needed < self.clusters.len() {
            let unused = self.clusters.split_off(needed);
            self.fat.store(&self.clusters)?;
            self.fat.free(&unused)?;
            debug!("Directory at cluster {} shrank by {} clusters", self.first_cluster(), unused.len());
        }

        if let Some(first) = start {
            let chain = self.fat.get_clusters(first)?;
            self.fat.free(&chain)?;
        }
        self.fat.commit()?;
        debug!("Removed {} from directory at cluster {}", entry.display_name(), self.first_cluster());
        Ok(())
    }

    fn add_cluster(&mut self, cluster: u16) -> DosResult<()> {
        self.append_cluster(cluster, None)
    }

    fn volume_label(&self) -> String {
        self.volume_label.clone()
    }

    fn handle(&self) -> DirectoryHandle {
        DirectoryHandle::Sub(self.clone())
    }
}
