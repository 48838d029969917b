// FAT16 root directory: a fixed-size region between the FATs and the data area

use super::dir_entry::{DirEntry, EntryLocation, DIR_ENTRY_SIZE};
use super::directory::{Directory, DirectoryHandle, Entries, DEFAULT_VOLUME_LABEL};
use super::fat_table::Fat16Table;
use dosvol_core::{DosError, DosResult};
use log::debug;
use std::sync::Arc;

/// The root directory, held in memory as the list loaded at open.
#[derive(Clone)]
pub struct RootDirectory {
    fat: Arc<Fat16Table>,
    entries: Vec<DirEntry>,
    max_entries: usize,
}

impl RootDirectory {
    pub fn new(fat: Arc<Fat16Table>, entries: Vec<DirEntry>, max_entries: usize) -> Self {
        Self { fat, entries, max_entries }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `entries` as the whole region and adopt them as the in-memory list.
    fn persist(&mut self, entries: Vec<DirEntry>) -> DosResult<()> {
        self.fat.write_root_directory(&entries)?;
        self.entries = entries
            .into_iter()
            .enumerate()
            .map(|(slot, entry)| entry.at(EntryLocation::Root { offset: slot * DIR_ENTRY_SIZE }))
            .collect();
        Ok(())
    }
}

impl Directory for RootDirectory {
    fn fat(&self) -> &Arc<Fat16Table> {
        &self.fat
    }

    fn entries(&self) -> Entries<'_> {
        Box::new(self.entries.iter().cloned().map(Ok::<DirEntry, DosError>))
    }

    fn first_cluster(&self) -> u16 {
        0
    }

    fn last_cluster(&self) -> u16 {
        0
    }

    fn add_entry(&mut self, entry: DirEntry) -> DosResult<DirEntry> {
        self.ensure_room()?;
        let mut updated = self.entries.clone();
        updated.push(entry);
        self.persist(updated)?;
        debug!("Added root entry, {} of {} slots used", self.entries.len(), self.max_entries);
        self.entries
            .last()
            .cloned()
            .ok_or_else(|| DosError::CorruptVolume("root directory lost its new entry".into()))
    }

    fn remove_entry(&mut self, entry: &DirEntry) -> DosResult<()> {
        let start = entry.chain_start()?;
        let before = self.entries.len();
        let retained: Vec<DirEntry> = self.entries.iter().filter(|e| !e.matches(entry)).cloned().collect();
        if retained.len() == before {
            return Err(DosError::NotFound(entry.display_name()));
        }
        self.persist(retained)?;

        if let Some(first) = start {
            let chain = self.fat.get_clusters(first)?;
            self.fat.free(&chain)?;
        }
        self.fat.commit()?;
        debug!("Removed {} from root directory", entry.display_name());
        Ok(())
    }

    fn add_cluster(&mut self, _cluster: u16) -> DosResult<()> {
        Err(DosError::NotSupported("the root directory cannot grow".into()))
    }

    fn ensure_room(&self) -> DosResult<()> {
        if self.entries.len() + 1 > self.max_entries {
            return Err(DosError::DirectoryFull(self.max_entries));
        }
        Ok(())
    }

    fn volume_label(&self) -> String {
        self.entries
            .iter()
            .find(|e| e.attributes().is_volume_id() && !e.attributes().is_lfn())
            .map(|e| e.display_name())
            .unwrap_or_else(|| DEFAULT_VOLUME_LABEL.to_string())
    }

    fn handle(&self) -> DirectoryHandle {
        DirectoryHandle::Root(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat16::dir_entry::FileAttributes;
    use crate::fat16::storage::testing::MemoryImage;
    use crate::fat_common::constants::{FAT16_EOC, MEDIA_FIXED};
    use dosvol_core::VolumeGeometry;

    fn volume(root_entries: u16) -> (Arc<MemoryImage>, Arc<Fat16Table>) {
        let g = VolumeGeometry::layout(512, 512, 2, 512, 100, root_entries);
        let image = Arc::new(MemoryImage::new(g.volume_end() as usize));
        let fat = Fat16Table::initialize(image.clone(), g, MEDIA_FIXED, FAT16_EOC).unwrap();
        (image, fat)
    }

    fn file(name: &str, cluster: u32) -> DirEntry {
        DirEntry::now(name, FileAttributes::archive(), cluster, 0).unwrap()
    }

    #[test]
    fn test_add_then_reload() {
        let (_, fat) = volume(16);
        let mut root = fat.root_directory().unwrap();
        let added = root.add_entry(file("A.TXT", 0)).unwrap();
        assert_eq!(added.location(), Some(EntryLocation::Root { offset: 0 }));
        root.add_entry(file("B.TXT", 0)).unwrap();

        let reloaded = fat.root_directory().unwrap();
        let names: Vec<String> = reloaded.entries().map(|e| e.unwrap().display_name()).collect();
        assert_eq!(names, vec!["A.TXT", "B.TXT"]);
        assert_eq!(reloaded.entries().nth(1).unwrap().unwrap().location(), Some(EntryLocation::Root { offset: 32 }));
    }

    #[test]
    fn test_full_root_is_untouched() {
        let (image, fat) = volume(2);
        let mut root = fat.root_directory().unwrap();
        root.add_entry(file("A", 0)).unwrap();
        root.add_entry(file("B", 0)).unwrap();

        let g = *fat.geometry();
        let before = image.snapshot(g.root_directory_offset, g.root_directory_bytes() as usize);
        let err = root.add_entry(file("C", 0)).unwrap_err();
        assert!(matches!(err, DosError::DirectoryFull(2)));
        assert_eq!(image.snapshot(g.root_directory_offset, g.root_directory_bytes() as usize), before);
        assert_eq!(root.len(), 2);
    }

    #[test]
    fn test_make_directory_in_full_root_keeps_clusters() {
        let (image, fat) = volume(1);
        let mut root = fat.root_directory().unwrap();
        root.add_entry(file("A", 0)).unwrap();
        fat.commit().unwrap();

        let g = *fat.geometry();
        let fat_before = image.snapshot(g.fat_offset, g.bytes_per_fat as usize);
        let free_before = fat.free_cluster_count();
        let err = root.make_directory("NEWDIR").err().unwrap();
        assert!(matches!(err, DosError::DirectoryFull(1)));
        assert_eq!(fat.free_cluster_count(), free_before);
        assert_eq!(fat.next_cluster(2).unwrap(), 0);

        fat.commit().unwrap();
        assert_eq!(image.snapshot(g.fat_offset, g.bytes_per_fat as usize), fat_before);
        let reopened = Fat16Table::open(image.clone(), g).unwrap();
        assert_eq!(reopened.free_cluster_count(), free_before);
    }

    #[test]
    fn test_failed_link_releases_new_cluster() {
        let (image, fat) = volume(16);
        let mut root = fat.root_directory().unwrap();
        let free_before = fat.free_cluster_count();

        // the cluster write succeeds, the root region write fails
        image.fail_writes_after(1);
        let err = root.make_directory("NEWDIR").err().unwrap();
        assert!(matches!(err, DosError::IoError(_)));
        assert_eq!(fat.free_cluster_count(), free_before);
        assert_eq!(fat.next_cluster(2).unwrap(), 0);

        image.fail_writes_after(usize::MAX);
        let created = root.make_directory("NEWDIR").unwrap();
        assert_eq!(fat.free_cluster_count(), free_before - 1);
        assert_eq!(fat.get_clusters(created.first_cluster()).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_rejects_out_of_range_cluster() {
        let (_, fat) = volume(16);
        let mut root = fat.root_directory().unwrap();
        let wide = root.add_entry(file("WIDE.BIN", 0x1_0002)).unwrap();
        let free_before = fat.free_cluster_count();

        assert!(matches!(root.remove_entry(&wide), Err(DosError::CorruptVolume(_))));
        assert_eq!(root.len(), 1);
        assert_eq!(fat.free_cluster_count(), free_before);

        let wide_dir = DirEntry::now("WIDEDIR", FileAttributes::directory(), 0x1_0002, 0).unwrap();
        assert!(matches!(root.subdirectory(&wide_dir), Err(DosError::CorruptVolume(_))));
    }

    #[test]
    fn test_remove_frees_chain() {
        let (_, fat) = volume(16);
        let chain = fat.allocate(3).unwrap();
        fat.store(&chain).unwrap();
        let mut root = fat.root_directory().unwrap();
        let entry = root.add_entry(file("DATA.BIN", chain[0] as u32)).unwrap();
        let free_before = fat.free_cluster_count();

        root.remove_entry(&entry).unwrap();
        assert_eq!(fat.free_cluster_count(), free_before + 3);
        assert!(fat.root_directory().unwrap().is_empty());
    }

    #[test]
    fn test_remove_missing_entry() {
        let (_, fat) = volume(16);
        let mut root = fat.root_directory().unwrap();
        assert!(matches!(root.remove_entry(&file("GHOST", 9)), Err(DosError::NotFound(_))));
    }

    #[test]
    fn test_volume_label() {
        let (_, fat) = volume(16);
        let mut root = fat.root_directory().unwrap();
        assert_eq!(root.volume_label(), DEFAULT_VOLUME_LABEL);
        let when = chrono::Local::now().naive_local();
        root.add_entry(DirEntry::volume_label("WORK DISK", when)).unwrap();
        assert_eq!(fat.root_directory().unwrap().volume_label(), "WORK DISK");
    }

    #[test]
    fn test_cannot_grow() {
        let (_, fat) = volume(16);
        let mut root = fat.root_directory().unwrap();
        assert!(matches!(root.add_cluster(5), Err(DosError::NotSupported(_))));
        assert_eq!(root.first_cluster(), 0);
        assert_eq!(root.last_cluster(), 0);
    }
}
