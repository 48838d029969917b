// FAT16 module - table engine, directory records and directories

pub mod boot_sector;
pub mod dir_entry;
pub mod directory;
pub mod fat_table;
pub mod free_space;
pub mod mbr;
pub mod root_directory;
pub mod storage;
pub mod subdirectory;

pub use boot_sector::BiosParameterBlock;
pub use dir_entry::{DirEntry, EntryLocation, FileAttributes};
pub use directory::{Directory, DirectoryHandle};
pub use fat_table::Fat16Table;
pub use mbr::{Chs, PartitionEntry, PartitionTable, PartitionType};
pub use root_directory::RootDirectory;
pub use storage::{ImageFile, VolumeStorage};
pub use subdirectory::{EntryIter, SubDirectory};
