use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dosvol_core::VolumeGeometry;
use dosvol_filesystems::fat16::boot_sector::media_description;
use dosvol_filesystems::fat16::directory::{find_entry, open_path, split_path};
use dosvol_filesystems::{
    BiosParameterBlock, DirEntry, Directory, Fat16Table, ImageFile, PartitionEntry, PartitionTable,
    VolumeStorage,
};
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dosvol")]
#[command(about = "Inspect and modify FAT16 volume images", long_about = None)]
struct Cli {
    /// Disk or volume image
    image: PathBuf,

    /// MBR partition (0-3) holding the volume
    #[arg(short, long, conflicts_with = "offset")]
    partition: Option<usize>,

    /// Byte offset of the volume boot sector inside the image
    #[arg(short, long)]
    offset: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show volume geometry and free space
    Info {
        #[arg(long)]
        json: bool,
    },
    /// List a directory
    Ls {
        /// Directory path, `/` separated from the root
        #[arg(default_value = "/")]
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Create a directory
    Mkdir {
        path: String,
    },
    /// Remove a file or an empty directory
    Rm {
        path: String,
    },
}

#[derive(Serialize)]
struct PartitionInfo {
    index: usize,
    #[serde(flatten)]
    entry: PartitionEntry,
}

#[derive(Serialize)]
struct VolumeInfo {
    volume_label: String,
    volume_offset: u64,
    partition: Option<PartitionInfo>,
    boot_sector: BiosParameterBlock,
    geometry: VolumeGeometry,
    media_type: u8,
    free_clusters: usize,
    free_bytes: u64,
}

#[derive(Serialize)]
struct ListingEntry {
    name: String,
    attributes: String,
    directory: bool,
    size: u32,
    first_cluster: u32,
    created: String,
    written: String,
}

impl From<&DirEntry> for ListingEntry {
    fn from(entry: &DirEntry) -> Self {
        Self {
            name: entry.display_name(),
            attributes: entry.attributes().short_string(),
            directory: entry.is_directory(),
            size: entry.file_size(),
            first_cluster: entry.first_cluster(),
            created: entry.created(),
            written: entry.written(),
        }
    }
}

/// Find the boot sector: explicit offset, a partition, an unpartitioned
/// volume at offset 0, or the first FAT16 partition. Also returns the
/// partition used, if any.
fn locate_volume(storage: &dyn VolumeStorage, cli: &Cli) -> anyhow::Result<(u64, Option<PartitionInfo>)> {
    if let Some(offset) = cli.offset {
        return Ok((offset, None));
    }
    if let Some(index) = cli.partition {
        let table = PartitionTable::read(storage)?;
        let entry = table.fat16_partition(index)?;
        return Ok((entry.byte_offset(), Some(PartitionInfo { index, entry })));
    }
    if BiosParameterBlock::read(storage, 0).is_ok() {
        debug!("Image holds an unpartitioned volume");
        return Ok((0, None));
    }
    let table = PartitionTable::read(storage).context("image has no boot sector or partition table")?;
    match table.first_fat16() {
        Some((index, entry)) => {
            info!("Using partition {}", index);
            Ok((entry.byte_offset(), Some(PartitionInfo { index, entry })))
        }
        None => bail!("no FAT16 partition found in {}", cli.image.display()),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let storage: Arc<dyn VolumeStorage> = Arc::new(ImageFile::new(&cli.image));
    let (volume_offset, partition) = locate_volume(storage.as_ref(), &cli)?;
    let bpb = BiosParameterBlock::read(storage.as_ref(), volume_offset)?;
    let geometry = bpb.to_geometry(volume_offset)?;
    let fat = Fat16Table::open(Arc::clone(&storage), geometry)?;

    match &cli.command {
        Commands::Info { json } => {
            let root = fat.root_directory()?;
            let summary = VolumeInfo {
                volume_label: root.volume_label(),
                volume_offset,
                partition,
                boot_sector: bpb.clone(),
                geometry,
                media_type: fat.media_type(),
                free_clusters: fat.free_cluster_count(),
                free_bytes: fat.free_space_bytes(),
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Volume label:     {}", summary.volume_label);
                println!("Volume offset:    {}", summary.volume_offset);
                if let Some(p) = &summary.partition {
                    println!(
                        "Partition:        {} ({}{}), LBA {} + {} sectors",
                        p.index,
                        p.entry.partition_type.name(),
                        if p.entry.bootable { ", bootable" } else { "" },
                        p.entry.lba_start,
                        p.entry.sector_count
                    );
                    println!("CHS start/end:    {} - {}", p.entry.start_chs, p.entry.end_chs);
                }
                println!("Media:            {:#04x} ({})", summary.media_type, media_description(summary.media_type));
                println!("Bytes/cluster:    {}", geometry.bytes_per_cluster);
                println!("Clusters:         {}", geometry.cluster_count);
                println!("FAT copies:       {}", geometry.fat_copies);
                println!("Root entries:     {}", geometry.root_directory_entries);
                println!("Free clusters:    {}", summary.free_clusters);
                println!("Free space:       {:.2} MB", summary.free_bytes as f64 / 1_048_576.0);
            }
        }
        Commands::Ls { path, json } => {
            let directory = open_path(&fat, path)?;
            let mut listing = Vec::new();
            for entry in directory.entries() {
                let entry = entry?;
                if !entry.attributes().is_lfn() {
                    listing.push(ListingEntry::from(&entry));
                }
            }
            if *json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!(" Volume {}", directory.volume_label());
                println!(" Directory of {}\n", path);
                for item in &listing {
                    let size = if item.directory { "<DIR>".to_string() } else { item.size.to_string() };
                    println!("{:<12} {} {:>10}  {}", item.name, item.attributes, size, item.written);
                }
                println!("\n{} entries, {} bytes free", listing.len(), fat.free_space_bytes());
            }
        }
        Commands::Mkdir { path } => {
            let (parent, name) = split_path(path)?;
            let mut directory = open_path(&fat, parent)?;
            let created = directory.make_directory(name)?;
            println!("Created {} at cluster {}", path, created.first_cluster());
        }
        Commands::Rm { path } => {
            let (parent, name) = split_path(path)?;
            let mut directory = open_path(&fat, parent)?;
            let entry = find_entry(&*directory, name)?;
            if entry.is_dot_entry() {
                bail!("cannot remove {}", name);
            }
            if entry.is_directory() {
                let target = directory.subdirectory(&entry)?;
                for child in target.entries() {
                    if !child?.is_dot_entry() {
                        bail!("directory {} is not empty", path);
                    }
                }
            }
            directory.remove_entry(&entry)?;
            println!("Removed {}", path);
        }
    }

    Ok(())
}
