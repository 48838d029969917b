// FAT16 volume engine
pub mod fat_common;
pub mod fat16;

pub use fat16::{
    BiosParameterBlock, DirEntry, Directory, DirectoryHandle, EntryLocation, Fat16Table,
    FileAttributes, ImageFile, PartitionEntry, PartitionTable, PartitionType, RootDirectory, SubDirectory,
    VolumeStorage,
};
