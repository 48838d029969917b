// FAT16 directory records: the 32-byte on-disk entry, 8.3 short names and
// the attribute bitfield

use crate::fat_common::bytes::{padded, read_u16, read_u32, trimmed_ascii, write_u16, write_u32};
use crate::fat_common::timestamps::{encode_date, encode_datetime, format_date, format_datetime};
use chrono::NaiveDateTime;
use dosvol_core::{DosError, DosResult};
use std::fmt;

pub const DIR_ENTRY_SIZE: usize = 32;
pub const SHORT_NAME_SIZE: usize = 11;

pub const CURRENT_DIRECTORY_NAME: &str = ".";
pub const PARENT_DIRECTORY_NAME: &str = "..";

// Field offsets inside a record
const NAME_OFFSET: usize = 0x00;
const ATTRIBUTES_OFFSET: usize = 0x0B;
const CREATION_TENTHS_OFFSET: usize = 0x0D;
const CREATION_TIME_OFFSET: usize = 0x0E;
const CREATION_DATE_OFFSET: usize = 0x10;
const LAST_ACCESS_DATE_OFFSET: usize = 0x12;
const FIRST_CLUSTER_HI_OFFSET: usize = 0x14;
const WRITE_TIME_OFFSET: usize = 0x16;
const WRITE_DATE_OFFSET: usize = 0x18;
const FIRST_CLUSTER_LO_OFFSET: usize = 0x1A;
const FILE_SIZE_OFFSET: usize = 0x1C;

const FIRST_CLUSTER_HI_MASK: u32 = 0x3FFF;

const END_OF_ENTRIES: u8 = 0x00;
const DELETED_ENTRY: u8 = 0xE5;

/// FAT directory entry attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes(pub u8);

impl FileAttributes {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_ID: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
    pub const RESERVED: u8 = 0xC0;
    pub const LFN: u8 = 0x0F;

    pub fn directory() -> Self {
        Self(Self::DIRECTORY)
    }

    pub fn archive() -> Self {
        Self(Self::ARCHIVE)
    }

    pub fn volume_label() -> Self {
        Self(Self::VOLUME_ID)
    }

    pub fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }

    pub fn is_read_only(&self) -> bool { self.0 & Self::READ_ONLY != 0 }
    pub fn is_hidden(&self) -> bool { self.0 & Self::HIDDEN != 0 }
    pub fn is_system(&self) -> bool { self.0 & Self::SYSTEM != 0 }
    pub fn is_volume_id(&self) -> bool { self.0 & Self::VOLUME_ID != 0 }
    pub fn is_directory(&self) -> bool { self.0 & Self::DIRECTORY != 0 }
    pub fn is_archive(&self) -> bool { self.0 & Self::ARCHIVE != 0 }
    pub fn is_lfn(&self) -> bool { self.0 & 0x3F == Self::LFN }

    /// `RHSVDA` with `-` for each flag that is not set.
    pub fn short_string(&self) -> String {
        [
            ('R', self.is_read_only()),
            ('H', self.is_hidden()),
            ('S', self.is_system()),
            ('V', self.is_volume_id()),
            ('D', self.is_directory()),
            ('A', self.is_archive()),
        ]
        .iter()
        .map(|&(c, set)| if set { c } else { '-' })
        .collect()
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_string())
    }
}

/// Where a persisted entry lives. Offsets are relative to the start of the
/// root region or of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLocation {
    Root { offset: usize },
    Cluster { cluster: u16, offset: usize },
}

/// The region a buffer was read from, used to stamp decoded entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Root,
    Cluster(u16),
}

impl Region {
    fn locate(self, offset: usize) -> EntryLocation {
        match self {
            Region::Root => EntryLocation::Root { offset },
            Region::Cluster(cluster) => EntryLocation::Cluster { cluster, offset },
        }
    }
}

/// Encode a file or directory name into the 11-byte 8.3 field.
///
/// "." and ".." are stored verbatim. Anything else must be a base of 1-8
/// characters with an optional extension of up to 3, split by one dot.
pub fn short_name(name: &str) -> DosResult<[u8; SHORT_NAME_SIZE]> {
    if name == CURRENT_DIRECTORY_NAME || name == PARENT_DIRECTORY_NAME {
        return Ok(padded(name.as_bytes(), b' '));
    }

    let upper = name.to_ascii_uppercase();
    let mut parts = upper.split('.');
    let base = parts.next().unwrap_or("");
    let ext = parts.next().unwrap_or("");
    if parts.next().is_some() {
        return Err(DosError::InvalidInput(format!("{} is not a valid file name", name)));
    }
    if base.is_empty() {
        return Err(DosError::InvalidInput(format!("{} has an empty base name", name)));
    }
    if base.len() > 8 {
        return Err(DosError::InvalidInput(format!(
            "file name {} should not exceed 8 characters",
            base
        )));
    }
    if ext.len() > 3 {
        return Err(DosError::InvalidInput(format!(
            "file extension {} should not exceed 3 characters",
            ext
        )));
    }
    if let Some(bad) = upper.bytes().find(|&b| b != b'.' && !is_valid_83_char(b)) {
        return Err(DosError::InvalidInput(format!(
            "invalid character {:?} in file name {}",
            bad as char, name
        )));
    }

    let mut field = [b' '; SHORT_NAME_SIZE];
    field[..base.len()].copy_from_slice(base.as_bytes());
    field[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
    Ok(field)
}

/// Check if a character is valid for 8.3 filenames
fn is_valid_83_char(c: u8) -> bool {
    matches!(
        c,
        b'A'..=b'Z' | b'0'..=b'9' | b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'(' | b')'
            | b'-' | b'@' | b'^' | b'_' | b'`' | b'{' | b'}' | b'~'
    )
}

/// Directory name for `make_directory`: at most 8 characters, no extension.
pub fn validate_directory_name(name: &str) -> DosResult<()> {
    if name.len() > 8 {
        return Err(DosError::InvalidInput(format!(
            "directory name {} must not exceed 8 characters",
            name
        )));
    }
    if name.contains('.') {
        return Err(DosError::InvalidInput(format!(
            "directory name {} must not have an extension",
            name
        )));
    }
    short_name(name).map(|_| ())
}

/// One 32-byte directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; SHORT_NAME_SIZE],
    attributes: FileAttributes,
    creation_tenths: u8,
    creation_time: u16,
    creation_date: u16,
    last_access_date: u16,
    first_cluster: u32,
    write_time: u16,
    write_date: u16,
    file_size: u32,
    location: Option<EntryLocation>,
}

impl DirEntry {
    /// A new, unpersisted entry. Fails if `name` is not a valid 8.3 name.
    pub fn new(
        name: &str,
        attributes: FileAttributes,
        created: NaiveDateTime,
        written: NaiveDateTime,
        first_cluster: u32,
        file_size: u32,
    ) -> DosResult<Self> {
        let (creation_date, creation_time) = encode_datetime(created);
        let (write_date, write_time) = encode_datetime(written);
        Ok(Self {
            name: short_name(name)?,
            attributes,
            creation_tenths: 0,
            creation_time,
            creation_date,
            last_access_date: encode_date(written.date()),
            first_cluster,
            write_time,
            write_date,
            file_size,
            location: None,
        })
    }

    /// A new entry stamped with the current local time.
    pub fn now(name: &str, attributes: FileAttributes, first_cluster: u32, file_size: u32) -> DosResult<Self> {
        let now = chrono::Local::now().naive_local();
        Self::new(name, attributes, now, now, first_cluster, file_size)
    }

    /// Volume label record: up to 11 characters, upper-cased, no name/extension split.
    pub fn volume_label(label: &str, when: NaiveDateTime) -> Self {
        let (date, time) = encode_datetime(when);
        Self {
            name: padded(label.to_ascii_uppercase().as_bytes(), b' '),
            attributes: FileAttributes::volume_label(),
            creation_tenths: 0,
            creation_time: time,
            creation_date: date,
            last_access_date: date,
            first_cluster: 0,
            write_time: time,
            write_date: date,
            file_size: 0,
            location: None,
        }
    }

    /// Decode the record at `offset`. The result carries no location.
    pub fn decode(buf: &[u8], offset: usize) -> Self {
        let raw = &buf[offset..offset + DIR_ENTRY_SIZE];
        let mut name = [0u8; SHORT_NAME_SIZE];
        name.copy_from_slice(&raw[NAME_OFFSET..NAME_OFFSET + SHORT_NAME_SIZE]);

        let hi = read_u16(raw, FIRST_CLUSTER_HI_OFFSET) as u32;
        let lo = read_u16(raw, FIRST_CLUSTER_LO_OFFSET) as u32;

        Self {
            name,
            attributes: FileAttributes(raw[ATTRIBUTES_OFFSET]),
            creation_tenths: raw[CREATION_TENTHS_OFFSET],
            creation_time: read_u16(raw, CREATION_TIME_OFFSET),
            creation_date: read_u16(raw, CREATION_DATE_OFFSET),
            last_access_date: read_u16(raw, LAST_ACCESS_DATE_OFFSET),
            first_cluster: (hi << 16) | lo,
            write_time: read_u16(raw, WRITE_TIME_OFFSET),
            write_date: read_u16(raw, WRITE_DATE_OFFSET),
            file_size: read_u32(raw, FILE_SIZE_OFFSET),
            location: None,
        }
    }

    /// Serialize into a fresh 32-byte record.
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        self.encode_into(&mut raw);
        raw
    }

    /// Serialize into `target[..32]`, zeroing it first.
    pub fn encode_into(&self, target: &mut [u8]) {
        let raw = &mut target[..DIR_ENTRY_SIZE];
        raw.fill(0);
        raw[NAME_OFFSET..NAME_OFFSET + SHORT_NAME_SIZE].copy_from_slice(&self.name);
        raw[ATTRIBUTES_OFFSET] = self.attributes.0;
        raw[CREATION_TENTHS_OFFSET] = 0;
        write_u16(raw, CREATION_TIME_OFFSET, self.creation_time);
        write_u16(raw, CREATION_DATE_OFFSET, self.creation_date);
        write_u16(raw, LAST_ACCESS_DATE_OFFSET, self.last_access_date);
        write_u16(raw, FIRST_CLUSTER_HI_OFFSET, ((self.first_cluster >> 16) & FIRST_CLUSTER_HI_MASK) as u16);
        write_u16(raw, WRITE_TIME_OFFSET, self.write_time);
        write_u16(raw, WRITE_DATE_OFFSET, self.write_date);
        write_u16(raw, FIRST_CLUSTER_LO_OFFSET, (self.first_cluster & 0xFFFF) as u16);
        write_u32(raw, FILE_SIZE_OFFSET, self.file_size);
    }

    /// Human-readable name: the whole label for volume entries, else `BASE[.EXT]`.
    pub fn display_name(&self) -> String {
        if self.attributes.is_volume_id() {
            return trimmed_ascii(&self.name);
        }
        let base = trimmed_ascii(&self.name[..8]);
        let ext = trimmed_ascii(&self.name[8..]);
        if ext.is_empty() {
            base
        } else {
            format!("{}.{}", base, ext)
        }
    }

    /// Identity used when removing entries. Entries are the same when their
    /// first clusters agree; unallocated entries (cluster 0) also need equal names.
    pub fn matches(&self, other: &DirEntry) -> bool {
        if self.first_cluster != other.first_cluster {
            return false;
        }
        self.first_cluster != 0 || self.name == other.name
    }

    pub fn is_dot_entry(&self) -> bool {
        self.name == padded::<SHORT_NAME_SIZE>(CURRENT_DIRECTORY_NAME.as_bytes(), b' ')
            || self.name == padded::<SHORT_NAME_SIZE>(PARENT_DIRECTORY_NAME.as_bytes(), b' ')
    }

    pub fn short_name(&self) -> &[u8; SHORT_NAME_SIZE] {
        &self.name
    }

    pub fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    /// Start of the entry's cluster chain, or `None` when nothing is allocated.
    /// A FAT16 chain cannot start past 0xFFFF.
    pub fn chain_start(&self) -> DosResult<Option<u16>> {
        match self.first_cluster {
            0 => Ok(None),
            cluster => u16::try_from(cluster).map(Some).map_err(|_| {
                DosError::CorruptVolume(format!(
                    "{} starts at cluster {:#x}, beyond FAT16 range",
                    self.display_name(),
                    cluster
                ))
            }),
        }
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn creation_tenths(&self) -> u8 {
        self.creation_tenths
    }

    pub fn creation_date(&self) -> u16 {
        self.creation_date
    }

    pub fn creation_time(&self) -> u16 {
        self.creation_time
    }

    pub fn last_access_date(&self) -> u16 {
        self.last_access_date
    }

    pub fn write_date(&self) -> u16 {
        self.write_date
    }

    pub fn write_time(&self) -> u16 {
        self.write_time
    }

    pub fn created(&self) -> String {
        format_datetime(self.creation_date, self.creation_time)
    }

    pub fn written(&self) -> String {
        format_datetime(self.write_date, self.write_time)
    }

    pub fn accessed(&self) -> String {
        format_date(self.last_access_date)
    }

    /// Home of a persisted entry; `None` until it has been read from or written to disk.
    pub fn location(&self) -> Option<EntryLocation> {
        self.location
    }

    pub fn is_persisted(&self) -> bool {
        self.location.is_some()
    }

    pub(crate) fn at(mut self, location: EntryLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// "." and ".." records for a new subdirectory.
pub fn boilerplate_entries(own_cluster: u16, parent_cluster: u16, when: NaiveDateTime) -> DosResult<[DirEntry; 2]> {
    let attributes = FileAttributes::directory();
    Ok([
        DirEntry::new(CURRENT_DIRECTORY_NAME, attributes, when, when, own_cluster as u32, 0)?,
        DirEntry::new(PARENT_DIRECTORY_NAME, attributes, when, when, parent_cluster as u32, 0)?,
    ])
}

/// Decode every record in `buf` up to the first end-of-entries slot.
/// Deleted slots are skipped.
pub fn scan_region(buf: &[u8], region: Region) -> Vec<DirEntry> {
    buf.chunks_exact(DIR_ENTRY_SIZE)
        .take_while(|slot| slot[0] != END_OF_ENTRIES)
        .enumerate()
        .filter(|(_, slot)| slot[0] != DELETED_ENTRY)
        .map(|(index, _)| {
            let offset = index * DIR_ENTRY_SIZE;
            DirEntry::decode(buf, offset).at(region.locate(offset))
        })
        .collect()
}

/// Index of the first end-of-entries slot, or the slot count if there is none.
pub fn used_slots(buf: &[u8]) -> usize {
    buf.chunks_exact(DIR_ENTRY_SIZE)
        .position(|slot| slot[0] == END_OF_ENTRIES)
        .unwrap_or(buf.len() / DIR_ENTRY_SIZE)
}
