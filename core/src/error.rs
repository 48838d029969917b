use thiserror::Error;

#[derive(Debug, Error)]
pub enum DosError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid cluster number: {0}")]
    InvalidCluster(u32),

    #[error("Requested {requested} clusters but only {available} are free")]
    InsufficientSpace { requested: usize, available: usize },

    #[error("Directory already holds its maximum of {0} entries")]
    DirectoryFull(usize),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid volume geometry: {0}")]
    InvalidGeometry(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Corrupt volume: {0}")]
    CorruptVolume(String),
}

impl DosError {
    /// True for errors caused by caller input, raised before any mutation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DosError::InvalidInput(_)
                | DosError::InvalidCluster(_)
                | DosError::InsufficientSpace { .. }
                | DosError::DirectoryFull(_)
                | DosError::NotFound(_)
                | DosError::InvalidGeometry(_)
        )
    }
}

pub type DosResult<T> = Result<T, DosError>;
