// Directory capability shared by the fixed root region and cluster-chained
// subdirectories

use super::dir_entry::{
    boilerplate_entries, validate_directory_name, DirEntry, FileAttributes, DIR_ENTRY_SIZE,
};
use super::fat_table::Fat16Table;
use super::root_directory::RootDirectory;
use super::subdirectory::SubDirectory;
use dosvol_core::{DosError, DosResult};
use log::debug;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

pub const DEFAULT_VOLUME_LABEL: &str = "NO_VM_LABEL";

pub type Entries<'a> = Box<dyn Iterator<Item = DosResult<DirEntry>> + 'a>;

/// Operations every directory supports.
///
/// Mutating calls take `&mut self`: one writer per directory at a time.
pub trait Directory {
    /// Engine the directory lives on.
    fn fat(&self) -> &Arc<Fat16Table>;

    /// Every entry in on-disk order. Reading stops at the first I/O error,
    /// which is yielded as the last item.
    fn entries(&self) -> Entries<'_>;

    /// First cluster of the directory; 0 for the root.
    fn first_cluster(&self) -> u16;

    /// Last cluster of the directory; 0 for the root.
    fn last_cluster(&self) -> u16;

    /// Persist `entry` and return it with its on-disk location.
    fn add_entry(&mut self, entry: DirEntry) -> DosResult<DirEntry>;

    /// Drop `entry` from the directory and free its cluster chain.
    fn remove_entry(&mut self, entry: &DirEntry) -> DosResult<()>;

    /// Append an already reserved cluster to the directory's chain.
    fn add_cluster(&mut self, cluster: u16) -> DosResult<()>;

    /// Fails with `DirectoryFull` when one more entry cannot be added.
    /// Directories that grow on demand always have room.
    fn ensure_room(&self) -> DosResult<()> {
        Ok(())
    }

    fn volume_label(&self) -> String;

    /// A handle to this same directory.
    fn handle(&self) -> DirectoryHandle;

    /// Open the directory `entry` refers to.
    fn subdirectory(&self, entry: &DirEntry) -> DosResult<DirectoryHandle> {
        if !entry.is_directory() {
            return Err(DosError::InvalidInput(format!(
                "{} is not a directory",
                entry.display_name()
            )));
        }
        let cluster = match entry.chain_start()? {
            None => return Ok(DirectoryHandle::Root(self.fat().root_directory()?)),
            Some(cluster) => cluster,
        };
        if cluster == self.first_cluster() {
            return Ok(self.handle());
        }
        let chain = self.fat().get_clusters(cluster)?;
        Ok(DirectoryHandle::Sub(SubDirectory::new(
            Arc::clone(self.fat()),
            chain,
            self.volume_label(),
        )))
    }

    /// Open the subdirectory called `name`, ignoring case.
    fn subdirectory_named(&self, name: &str) -> DosResult<DirectoryHandle> {
        for entry in self.entries() {
            let entry = entry?;
            if entry.is_directory() && entry.display_name().eq_ignore_ascii_case(name) {
                return self.subdirectory(&entry);
            }
        }
        Err(DosError::NotFound(format!("no directory named {}", name)))
    }

    /// Create an empty subdirectory called `name` and return it.
    ///
    /// On failure the new cluster is released again; a failed `commit` leaves
    /// the entry added and the cluster linked in memory.
    fn make_directory(&mut self, name: &str) -> DosResult<DirectoryHandle> {
        validate_directory_name(name)?;
        if find_entry(&*self, name).is_ok() {
            return Err(DosError::InvalidInput(format!("{} already exists", name)));
        }
        self.ensure_room()?;

        let fat = Arc::clone(self.fat());
        let cluster = fat
            .allocate(1)?
            .first()
            .copied()
            .ok_or_else(|| DosError::InsufficientSpace { requested: 1, available: 0 })?;

        let parent_cluster = self.first_cluster();
        let now = chrono::Local::now().naive_local();
        let linked = boilerplate_entries(cluster, parent_cluster, now)
            .and_then(|[dot, dot_dot]| {
                let mut buffer = vec![0u8; fat.bytes_per_cluster() as usize];
                dot.encode_into(&mut buffer[0..]);
                dot_dot.encode_into(&mut buffer[DIR_ENTRY_SIZE..]);
                fat.write_cluster(&buffer, cluster)
            })
            .and_then(|_| fat.store(&[cluster]))
            .and_then(|_| DirEntry::new(name, FileAttributes::directory(), now, now, cluster as u32, 0))
            .and_then(|entry| self.add_entry(entry));
        if let Err(e) = linked {
            debug!("Creating directory {} failed, releasing cluster {}", name, cluster);
            fat.free(&[cluster])?;
            return Err(e);
        }
        fat.commit()?;

        debug!("Created directory {} at cluster {}", name, cluster);
        Ok(DirectoryHandle::Sub(SubDirectory::new(fat, vec![cluster], self.volume_label())))
    }
}

/// Either kind of directory, as returned by navigation.
#[derive(Clone)]
pub enum DirectoryHandle {
    Root(RootDirectory),
    Sub(SubDirectory),
}

impl DirectoryHandle {
    pub fn is_root(&self) -> bool {
        matches!(self, DirectoryHandle::Root(_))
    }
}

impl Deref for DirectoryHandle {
    type Target = dyn Directory;

    fn deref(&self) -> &Self::Target {
        match self {
            DirectoryHandle::Root(root) => root,
            DirectoryHandle::Sub(sub) => sub,
        }
    }
}

impl DerefMut for DirectoryHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            DirectoryHandle::Root(root) => root,
            DirectoryHandle::Sub(sub) => sub,
        }
    }
}

/// Entry named `name` (case-insensitive) in `directory`.
pub fn find_entry<D: Directory + ?Sized>(directory: &D, name: &str) -> DosResult<DirEntry> {
    for entry in directory.entries() {
        let entry = entry?;
        if !entry.attributes().is_volume_id() && entry.display_name().eq_ignore_ascii_case(name) {
            return Ok(entry);
        }
    }
    Err(DosError::NotFound(name.to_string()))
}

/// Walk a `/`-separated path of directory names from the root.
pub fn open_path(fat: &Arc<Fat16Table>, path: &str) -> DosResult<DirectoryHandle> {
    let mut current = DirectoryHandle::Root(fat.root_directory()?);
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current = current.subdirectory_named(component)?;
    }
    Ok(current)
}

/// Split a path into its parent directory path and final component.
pub fn split_path(path: &str) -> DosResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = match trimmed.rfind('/') {
        Some(index) => (&trimmed[..index], &trimmed[index + 1..]),
        None => ("", trimmed),
    };
    if name.is_empty() {
        return Err(DosError::InvalidInput(format!("{} does not name an entry", path)));
    }
    Ok((parent, name))
}
