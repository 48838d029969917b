// FAT16 engine and directory tests against image files on disk

use dosvol_core::{DosError, VolumeGeometry};
use dosvol_filesystems::fat16::directory::{find_entry, open_path};
use dosvol_filesystems::fat16::mbr::Chs;
use dosvol_filesystems::fat_common::bytes::{write_u16, write_u32};
use dosvol_filesystems::fat_common::constants::{FAT16_EOC, MEDIA_FIXED};
use dosvol_filesystems::{
    BiosParameterBlock, DirEntry, Directory, DirectoryHandle, Fat16Table, FileAttributes,
    ImageFile, PartitionTable, VolumeStorage,
};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::NamedTempFile;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Blank image sized for `geometry`, with an initialized FAT and root region.
fn create_volume(geometry: VolumeGeometry) -> (NamedTempFile, Arc<Fat16Table>) {
    init_logging();
    let temp_file = NamedTempFile::new().unwrap();
    temp_file.as_file().set_len(geometry.volume_end()).unwrap();
    let storage: Arc<dyn VolumeStorage> = Arc::new(ImageFile::new(temp_file.path()));
    let fat = Fat16Table::initialize(storage, geometry, MEDIA_FIXED, FAT16_EOC).unwrap();
    (temp_file, fat)
}

fn small_geometry() -> VolumeGeometry {
    VolumeGeometry::layout(512, 1024, 2, 512, 400, 16)
}

fn reopen(temp_file: &NamedTempFile, geometry: VolumeGeometry) -> Arc<Fat16Table> {
    Fat16Table::open(Arc::new(ImageFile::new(temp_file.path())), geometry).unwrap()
}

fn file(name: &str, cluster: u32, size: u32) -> DirEntry {
    DirEntry::now(name, FileAttributes::archive(), cluster, size).unwrap()
}

fn names(directory: &dyn Directory) -> Vec<String> {
    directory.entries().map(|e| e.unwrap().display_name()).collect()
}

#[test]
fn test_concurrent_allocation_is_disjoint() {
    let geometry = small_geometry();
    let (_temp, fat) = create_volume(geometry);
    let threads = 8;
    let per_call = 5;
    let calls = 10;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let fat = Arc::clone(&fat);
            thread::spawn(move || {
                let mut mine = Vec::new();
                for _ in 0..calls {
                    mine.extend(fat.allocate(per_call).unwrap());
                }
                mine
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for cluster in handle.join().unwrap() {
            assert!(seen.insert(cluster), "cluster {} allocated twice", cluster);
        }
    }
    assert_eq!(seen.len(), threads * per_call * calls);
    assert_eq!(fat.free_cluster_count(), 400 - seen.len());
}

#[test]
fn test_exhausting_the_pool() {
    let (_temp, fat) = create_volume(small_geometry());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fat = Arc::clone(&fat);
            thread::spawn(move || fat.allocate(100).unwrap())
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();
    assert_eq!(total, 400);

    let err = fat.allocate(1).unwrap_err();
    assert!(matches!(err, DosError::InsufficientSpace { requested: 1, available: 0 }));
}

#[test]
fn test_chain_survives_reopen() {
    let geometry = small_geometry();
    let (temp, fat) = create_volume(geometry);
    let chain = fat.allocate_bytes(1500).unwrap();
    assert_eq!(chain.len(), 3);
    fat.store(&chain).unwrap();
    fat.commit().unwrap();

    let reopened = reopen(&temp, geometry);
    assert_eq!(reopened.get_clusters(chain[0]).unwrap(), chain);
    assert_eq!(reopened.free_cluster_count(), 397);
    assert_eq!(reopened.end_of_chain_marker(), FAT16_EOC);
}

#[test]
fn test_uncommitted_store_is_not_persisted() {
    let geometry = small_geometry();
    let (temp, fat) = create_volume(geometry);
    let chain = fat.allocate(2).unwrap();
    fat.store(&chain).unwrap();

    let reopened = reopen(&temp, geometry);
    assert_eq!(reopened.free_cluster_count(), 400);
}

#[test]
fn test_fat_copies_match_after_commit() {
    let geometry = small_geometry();
    let (temp, fat) = create_volume(geometry);
    let chain = fat.allocate(10).unwrap();
    fat.store(&chain).unwrap();
    fat.commit().unwrap();

    let bytes = fs::read(temp.path()).unwrap();
    let size = geometry.bytes_per_fat as usize;
    let first = geometry.fat_copy_offset(0) as usize;
    let second = geometry.fat_copy_offset(1) as usize;
    assert_eq!(bytes[first..first + size], bytes[second..second + size]);
    assert_eq!(&bytes[first..first + 4], &[0xF8, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn test_full_root_leaves_region_unchanged() {
    let geometry = VolumeGeometry::layout(512, 1024, 2, 512, 400, 4);
    let (temp, fat) = create_volume(geometry);
    let mut root = fat.root_directory().unwrap();
    for (i, name) in ["A", "B", "C", "D"].iter().enumerate() {
        root.add_entry(file(name, 0, i as u32)).unwrap();
    }

    let start = geometry.root_directory_offset as usize;
    let end = start + geometry.root_directory_bytes() as usize;
    let before = fs::read(temp.path()).unwrap()[start..end].to_vec();

    let err = root.add_entry(file("E", 0, 0)).unwrap_err();
    assert!(matches!(err, DosError::DirectoryFull(4)));
    assert_eq!(fs::read(temp.path()).unwrap()[start..end], before[..]);
}

#[test]
fn test_make_directory_layout_on_disk() {
    let geometry = small_geometry();
    let (temp, fat) = create_volume(geometry);
    let mut root = fat.root_directory().unwrap();
    let games = root.make_directory("GAMES").unwrap();
    let cluster = games.first_cluster();

    let fat = reopen(&temp, geometry);
    assert_eq!(fat.get_clusters(cluster).unwrap(), vec![cluster]);

    let raw = fat.read_cluster(cluster).unwrap();
    assert_eq!(&raw[0..11], b".          ");
    assert_eq!(&raw[32..43], b"..         ");
    assert_eq!(raw[11] & FileAttributes::DIRECTORY, FileAttributes::DIRECTORY);
    assert_eq!(u16::from_le_bytes([raw[26], raw[27]]), cluster);
    assert_eq!(u16::from_le_bytes([raw[32 + 26], raw[32 + 27]]), 0);
    assert_eq!(raw[64], 0);

    let root = fat.root_directory().unwrap();
    let entry = find_entry(&root, "games").unwrap();
    assert!(entry.is_directory());
    assert_eq!(entry.first_cluster(), cluster as u32);
}

#[test]
fn test_nested_directories_and_paths() {
    let geometry = small_geometry();
    let (_temp, fat) = create_volume(geometry);
    let mut root = fat.root_directory().unwrap();
    let mut games = root.make_directory("GAMES").unwrap();
    let mut doom = games.make_directory("DOOM").unwrap();
    doom.add_entry(file("DOOM.EXE", 0, 0)).unwrap();

    let found = open_path(&fat, "/games/doom").unwrap();
    assert_eq!(found.first_cluster(), doom.first_cluster());
    assert_eq!(names(&*found), vec![".", "..", "DOOM.EXE"]);

    let parent = found.subdirectory_named("..").unwrap();
    assert_eq!(parent.first_cluster(), games.first_cluster());
    assert!(matches!(open_path(&fat, "/games/quake"), Err(DosError::NotFound(_))));
}

#[test]
fn test_subdirectory_grows_and_shrinks() {
    let geometry = small_geometry();
    let (temp, fat) = create_volume(geometry);
    let mut root = fat.root_directory().unwrap();
    let mut dir = root.make_directory("MANY").unwrap();

    // 512-byte clusters hold 16 entries; "." and ".." take two.
    let mut added = Vec::new();
    for i in 0..14 {
        let chain = fat.allocate(1).unwrap();
        fat.store(&chain).unwrap();
        added.push(dir.add_entry(file(&format!("F{}", i), chain[0] as u32, 10)).unwrap());
    }
    let sub = match &dir {
        DirectoryHandle::Sub(sub) => sub.clone(),
        DirectoryHandle::Root(_) => panic!("expected a subdirectory"),
    };
    assert_eq!(sub.clusters().len(), 1);

    let free_before = fat.free_cluster_count();
    dir.add_entry(file("EXTRA", 0, 0)).unwrap();
    assert_ne!(dir.first_cluster(), dir.last_cluster());
    assert_eq!(fat.free_cluster_count(), free_before - 1);

    let reopened = reopen(&temp, geometry);
    let chain = reopened.get_clusters(dir.first_cluster()).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(open_path(&reopened, "/MANY").unwrap().entries().count(), 17);

    let free_before = fat.free_cluster_count();
    dir.remove_entry(&added[0]).unwrap();
    assert_eq!(dir.first_cluster(), dir.last_cluster());
    // One directory cluster and the removed file's cluster come back.
    assert_eq!(fat.free_cluster_count(), free_before + 2);
    assert_eq!(dir.entries().count(), 16);
}

#[test]
fn test_remove_file_frees_chain() {
    let geometry = small_geometry();
    let (temp, fat) = create_volume(geometry);
    let chain = fat.allocate_bytes(4096).unwrap();
    fat.store(&chain).unwrap();
    let mut root = fat.root_directory().unwrap();
    let entry = root.add_entry(file("BIG.DAT", chain[0] as u32, 4096)).unwrap();
    fat.commit().unwrap();
    assert_eq!(fat.free_cluster_count(), 392);

    root.remove_entry(&entry).unwrap();
    assert_eq!(fat.free_cluster_count(), 400);

    let reopened = reopen(&temp, geometry);
    assert_eq!(reopened.free_cluster_count(), 400);
    assert!(reopened.root_directory().unwrap().is_empty());
}

#[test]
fn test_io_error_surfaces_from_listing() {
    let geometry = small_geometry();
    let (temp, fat) = create_volume(geometry);
    let mut root = fat.root_directory().unwrap();
    let dir = root.make_directory("GONE").unwrap();

    temp.as_file().set_len(geometry.data_offset).unwrap();
    let results: Vec<_> = dir.entries().collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(DosError::IoError(_))));
}

fn write_partitioned_image(path: &std::path::Path, lba: u32, total_sectors: u16) {
    let volume_offset = lba as usize * 512;
    let mut image = vec![0u8; volume_offset + total_sectors as usize * 512];

    let entry = 0x1BE;
    // CHS for a 16-head, 63-sector disk
    image[entry + 1..entry + 4].copy_from_slice(&[0x00, 0x09, 0x00]);
    image[entry + 4] = 0x06;
    image[entry + 5..entry + 8].copy_from_slice(&[0x0F, 0x3F, 0x00]);
    write_u32(&mut image, entry + 8, lba);
    write_u32(&mut image, entry + 12, total_sectors as u32);
    image[510] = 0x55;
    image[511] = 0xAA;

    let boot = &mut image[volume_offset..volume_offset + 512];
    boot[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    write_u16(boot, 0x0B, 512);
    boot[0x0D] = 1;
    write_u16(boot, 0x0E, 1);
    boot[0x10] = 2;
    write_u16(boot, 0x11, 32);
    write_u16(boot, 0x13, total_sectors);
    boot[0x15] = MEDIA_FIXED;
    write_u16(boot, 0x16, 4);
    boot[510] = 0x55;
    boot[511] = 0xAA;

    fs::write(path, image).unwrap();
}

#[test]
fn test_geometry_from_partitioned_image() {
    init_logging();
    let temp = NamedTempFile::new().unwrap();
    write_partitioned_image(temp.path(), 8, 1000);
    let storage: Arc<dyn VolumeStorage> = Arc::new(ImageFile::new(temp.path()));

    let table = PartitionTable::read(storage.as_ref()).unwrap();
    let partition = table.fat16_partition(0).unwrap();
    assert_eq!(partition.byte_offset(), 8 * 512);
    assert_eq!(partition.start_chs, Chs { cylinder: 0, head: 0, sector: 9 });
    assert_eq!(partition.end_chs, Chs { cylinder: 0, head: 15, sector: 63 });

    let bpb = BiosParameterBlock::read(storage.as_ref(), partition.byte_offset()).unwrap();
    let geometry = bpb.to_geometry(partition.byte_offset()).unwrap();
    assert_eq!(geometry.fat_offset, 9 * 512);
    assert_eq!(geometry.root_directory_offset, 17 * 512);
    assert_eq!(geometry.data_offset, 19 * 512);
    assert_eq!(geometry.cluster_count, 1000 - 11);

    let fat = Fat16Table::initialize(storage, geometry, bpb.media, FAT16_EOC).unwrap();
    let mut root = fat.root_directory().unwrap();
    root.make_directory("DOCS").unwrap();
    assert_eq!(names(&*open_path(&fat, "/").unwrap()), vec!["DOCS"]);
}
