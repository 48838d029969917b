pub mod error;
pub mod geometry;

pub use error::{DosError, DosResult};
pub use geometry::{VolumeGeometry, DIRECTORY_ENTRY_SIZE};
